//! Capability interface the Capture Worker depends on for push
//! notifications: a `Notifier` trait rather than a bare function pointer
//! or duck-typed callback, so the HTTP/SSE layer can implement it and
//! tests can substitute a recording fake.

use std::path::Path;

pub trait Notifier: Send + Sync {
    fn notify_save(&self, path: &Path);
    fn notify_rename(&self, old_path: &Path, new_path: &Path);
}

/// Default `Notifier` used by the `lochistd` binary until an HTTP/SSE
/// host wires in its own fan-out; logs to stdout in the same plain style
/// used for other user-facing command output in this codebase.
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn notify_save(&self, path: &Path) {
        println!("saved: {}", path.display());
    }

    fn notify_rename(&self, old_path: &Path, new_path: &Path) {
        println!("renamed: {} -> {}", old_path.display(), new_path.display());
    }
}
