//! Crate-wide error taxonomy.
//!
//! Component-local error enums (`ConfigError`, `StoreError`) carry precise,
//! stable messages; `LochistError` unifies them at the boundaries that need
//! a single type (the capture worker, the CLI). Transient and operational
//! errors are recovered locally per component and never surface here -
//! only things that should actually propagate do.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum LochistError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("watcher subscription failed: {0}")]
    Watch(#[from] notify::Error),
}
