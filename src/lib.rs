//! lochist: background local-history capture service.
//!
//! Watches configured directory trees, debounces bursts of filesystem
//! events per file, and persists content-addressed, compressed snapshots
//! (plus rename history) into an embedded SQLite store. The HTTP/SSE
//! layer that serves this history to a browser is an external
//! collaborator; this crate exposes only the capture pipeline and the
//! store's query surface it depends on.

pub mod capture;
pub mod config;
pub mod debounce;
pub mod error;
pub mod filter;
pub mod ids;
pub mod notify_sink;
pub mod service;
pub mod store;
pub mod watcher;

pub use config::{Config, ConfigError, WatchGroup};
pub use error::LochistError;
pub use filter::{looks_binary, Filter};
pub use notify_sink::{LoggingNotifier, Notifier};
pub use service::Service;
pub use store::{HistoryEntry, SaveItem, SaveOutcome, Snapshot, SnapshotWithData, Store, StoreError};
