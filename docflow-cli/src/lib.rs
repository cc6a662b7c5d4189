pub mod cli;
pub mod commands;
pub mod error;
pub mod headless;

/// Default log directives, overridable through `RUST_LOG`.
pub const DEFAULT_LOG_DIRECTIVES: &[&str] = &["docflow=info", "docflow_core=info"];

/// Initialize tracing/logging with the given directives
///
/// Logs go to stderr so stdout stays machine-readable.
pub fn init_logging(directives: &[&str]) {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in directives {
        match directive.parse() {
            Ok(d) => filter = filter.add_directive(d),
            Err(e) => eprintln!("Ignoring log directive '{}': {}", directive, e),
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
