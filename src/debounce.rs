//! Debouncer and the shared per-path state it owns jointly with the
//! Event Ingestor's rename pairing.
//!
//! Real cancellable timer handles would need a platform timer wheel;
//! instead each armed timer carries a generation number for its path.
//! Arming a new timer bumps the generation; a sleeping timer only fires
//! the capture procedure if its generation is still the current one when
//! it wakes, which makes "cancel previous timer, install new one" safe
//! under concurrent arrival without an actual cancel operation.
//!
//! `SharedState` bundles the timer generations with the Ingestor's
//! pending-rename map behind one mutex, since both are a single piece of
//! global mutable state with one lock discipline - the bulk-scan
//! registry (`capture::ScanRegistry`) is deliberately a separate mutex.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::capture::{capture_procedure, JobSender};
use crate::filter::Filter;

#[derive(Default)]
pub struct SharedState {
    timers: HashMap<PathBuf, u64>,
    pub(crate) pending_renames: HashMap<PathBuf, Instant>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct Debouncer {
    state: Arc<Mutex<SharedState>>,
    filter: Arc<Filter>,
    queue: JobSender,
    shutdown: Arc<AtomicBool>,
}

impl Debouncer {
    pub fn new(
        state: Arc<Mutex<SharedState>>,
        filter: Arc<Filter>,
        queue: JobSender,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state,
            filter,
            queue,
            shutdown,
        }
    }

    /// Handles one incoming save request for `path`: look up the owning
    /// group's debounce interval, bump the path's generation (which
    /// invalidates any timer already in flight for it), and arm a fresh
    /// one.
    pub fn schedule(&self, path: &Path) {
        let Some(group) = self.filter.group_of(path) else {
            return;
        };
        let duration = Duration::from_secs(group.debounce_sec);

        let generation = {
            let mut state = self.state.lock().unwrap();
            let slot = state.timers.entry(path.to_path_buf()).or_insert(0);
            *slot += 1;
            *slot
        };

        let path = path.to_path_buf();
        let state = Arc::clone(&self.state);
        let filter = Arc::clone(&self.filter);
        let queue = self.queue.clone();
        let shutdown = Arc::clone(&self.shutdown);

        thread::spawn(move || {
            thread::sleep(duration);

            let fire = {
                let mut state = state.lock().unwrap();
                match state.timers.get(&path) {
                    Some(&g) if g == generation => {
                        state.timers.remove(&path);
                        true
                    }
                    _ => false,
                }
            };

            if fire && !shutdown.load(Ordering::SeqCst) {
                capture_procedure(&path, &filter, &queue);
            }
        });
    }

    /// Drops every armed timer without firing it. Sleeping timer threads notice via the
    /// shutdown flag and the vanished generation entry; this just clears
    /// the map so a racing `schedule` call doesn't resurrect stale state.
    pub fn stop_all(&self) {
        self.state.lock().unwrap().timers.clear();
    }
}
