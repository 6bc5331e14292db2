//! vault-sync - Git-versioned vaults mirrored to S3
//!
//! A local vault directory is versioned with git. Its history is mirrored
//! byte-for-byte under a bucket prefix, and files matching tracked
//! patterns are offloaded to content-addressed storage and replaced in
//! history by small pointer files.

pub mod config;
pub mod error;
pub mod git;
pub mod models;
pub mod services;
pub mod store;

#[cfg(test)]
mod test_utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use git::{GitHistory, HistoryGraph, MergeOutcome};
pub use models::{ConflictFile, Resolution, SyncStatus};
pub use services::{ConflictResolver, ConnectOutcome, PendingMerge, SyncOutcome, SyncService};
pub use store::{MemoryBackend, ObjectStore, S3Backend};

/// Initialize tracing. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vault_sync=debug,git2=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
