//! Document state pipeline.
//!
//! # Data flow
//!
//! ```text
//! PUSH (transport)        PULL (api)              LOCAL
//! ────────────────        ──────────              ─────
//! ProgressEvent           list_documents          begin_upload
//!       │                 get_document            upload_accepted
//!       │                 get_progress                  │
//!       ▼                       │                       │
//!   normalizer ◄────────────────┤                       │
//!       │                       ▼                       │
//!       │                  reconcile::merge             │
//!       ▼                       │                       ▼
//!   DocumentRegistry ◄──────────┴───────────────────────┘
//!       │
//!       ├──► RegistryEvent (listeners)
//!       └──► ParsingWatchdog (periodic scan)
//! ```
//!
//! The normalizer and the merge are pure; the registry is the only place
//! state is stored.

pub mod normalizer;
pub mod reconcile;
mod registry;
mod watchdog;

pub use normalizer::{fallback_progress, normalize, to_ratio, Normalized};
pub use reconcile::{
    merge, LocalEntry, MergeOutcome, MergedEntry, Origin, ReconcileGate, ReconcileTrigger,
};
pub use registry::{Applied, DocumentPatch, DocumentRegistry, RegistryEvent};
pub use watchdog::{ParsingWatchdog, StalledDocument};
