use clap::Parser;

use docflow_lib::cli::{self, Args};

#[tokio::main]
async fn main() {
    docflow_lib::init_logging(docflow_lib::DEFAULT_LOG_DIRECTIVES);
    let args = Args::parse();

    if let Err(e) = cli::run(args).await {
        tracing::error!("{}", e);
        match serde_json::to_string(&e) {
            Ok(json) => eprintln!("{}", json),
            Err(_) => eprintln!("{}", e),
        }
        std::process::exit(e.exit_code());
    }
}
