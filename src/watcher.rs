//! Event Ingestor: subscribes to OS filesystem events for every watch
//! group root, extends the subscription to newly created subdirectories,
//! filters non-directory events through the Filter, and recognises
//! rename pre-events heuristically.
//!
//! The watcher callback only forwards raw events onto a channel, and a
//! dedicated thread does all the filtering and dispatch. The Ingestor
//! only produces jobs - it never calls back into the Capture Worker
//! directly, and the only things it shares with the worker side are the
//! queue and the timer/pending-rename mutex.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::capture::{bulk_scan, CaptureJob, JobSender, ScanRegistry};
use crate::config::Config;
use crate::debounce::{Debouncer, SharedState};
use crate::error::LochistError;
use crate::filter::Filter;

const RENAME_WINDOW: Duration = Duration::from_millis(500);

/// Owns the live `notify` subscription plus the background thread that
/// drains its event channel. Dropping it stops the dispatch thread once
/// the shutdown flag is observed; the watcher itself is released last,
/// after the thread has exited.
pub struct Ingestor {
    watcher: Arc<Mutex<RecommendedWatcher>>,
    dispatch: Option<thread::JoinHandle<()>>,
}

impl Ingestor {
    /// Subscribes recursively to every group root and starts the
    /// dispatch thread.
    pub fn start(
        config: &Config,
        filter: Arc<Filter>,
        debouncer: Arc<Debouncer>,
        shared_state: Arc<Mutex<SharedState>>,
        queue: JobSender,
        scan_registry: Arc<ScanRegistry>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, LochistError> {
        let (tx, rx) = std_mpsc::channel::<notify::Result<Event>>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            NotifyConfig::default(),
        )?;

        for group in &config.groups {
            for root in &group.dirs {
                watcher.watch(root, RecursiveMode::Recursive)?;
            }
        }

        let watcher = Arc::new(Mutex::new(watcher));

        let dispatch = {
            let filter = Arc::clone(&filter);
            let debouncer = Arc::clone(&debouncer);
            let shared_state = Arc::clone(&shared_state);
            let queue = queue.clone();
            let scan_registry = Arc::clone(&scan_registry);
            let shutdown = Arc::clone(&shutdown);
            let watcher_ref = Arc::clone(&watcher);
            thread::spawn(move || {
                dispatch_loop(
                    rx,
                    filter,
                    debouncer,
                    shared_state,
                    queue,
                    scan_registry,
                    watcher_ref,
                    shutdown,
                )
            })
        };

        Ok(Self {
            watcher,
            dispatch: Some(dispatch),
        })
    }

    /// Stops the dispatch thread and drops the OS subscription only
    /// after it has exited.
    pub fn shutdown(mut self) {
        if let Some(handle) = self.dispatch.take() {
            let _ = handle.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch_loop(
    rx: std_mpsc::Receiver<notify::Result<Event>>,
    filter: Arc<Filter>,
    debouncer: Arc<Debouncer>,
    shared_state: Arc<Mutex<SharedState>>,
    queue: JobSender,
    scan_registry: Arc<ScanRegistry>,
    watcher: Arc<Mutex<RecommendedWatcher>>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        let event = match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => event,
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                continue;
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => return,
        };

        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        match event {
            Ok(event) => handle_event(
                event,
                &filter,
                &debouncer,
                &shared_state,
                &queue,
                &scan_registry,
                &watcher,
                &shutdown,
            ),
            Err(e) => eprintln!("WARNING: watcher error: {e}"),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_event(
    event: Event,
    filter: &Arc<Filter>,
    debouncer: &Arc<Debouncer>,
    shared_state: &Arc<Mutex<SharedState>>,
    queue: &JobSender,
    scan_registry: &Arc<ScanRegistry>,
    watcher: &Arc<Mutex<RecommendedWatcher>>,
    shutdown: &Arc<AtomicBool>,
) {
    match event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                handle_creation(path, filter, debouncer, shared_state, queue, scan_registry, watcher, shutdown);
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => {
                if let Some(path) = event.paths.first() {
                    mark_pending_rename(path, shared_state);
                }
            }
            RenameMode::To => {
                for path in &event.paths {
                    handle_creation(path, filter, debouncer, shared_state, queue, scan_registry, watcher, shutdown);
                }
            }
            RenameMode::Both => {
                if event.paths.len() >= 2 {
                    dispatch_rename(&event.paths[0], &event.paths[1], queue);
                    handle_creation(
                        &event.paths[1],
                        filter,
                        debouncer,
                        shared_state,
                        queue,
                        scan_registry,
                        watcher,
                        shutdown,
                    );
                }
            }
            RenameMode::Any | RenameMode::Other => {
                for path in &event.paths {
                    handle_creation(path, filter, debouncer, shared_state, queue, scan_registry, watcher, shutdown);
                }
            }
        },
        EventKind::Modify(_) => {
            for path in &event.paths {
                if filter.should_track(path) {
                    debouncer.schedule(path);
                }
            }
        }
        _ => {}
    }
}

/// A creation event may be the destination half of a rename the OS
/// reported as two independent events. Check the pending-rename map
/// first, then fall through to normal directory-onboarding / debounce
/// handling.
#[allow(clippy::too_many_arguments)]
fn handle_creation(
    path: &Path,
    filter: &Arc<Filter>,
    debouncer: &Arc<Debouncer>,
    shared_state: &Arc<Mutex<SharedState>>,
    queue: &JobSender,
    scan_registry: &Arc<ScanRegistry>,
    watcher: &Arc<Mutex<RecommendedWatcher>>,
    shutdown: &Arc<AtomicBool>,
) {
    if let Some(old_path) = consume_matching_pending_rename(path, filter, shared_state) {
        dispatch_rename(&old_path, path, queue);
    }

    if path.is_dir() {
        if filter.is_excluded_dir(path) {
            return;
        }

        if let Err(e) = watcher.lock().unwrap().watch(path, RecursiveMode::Recursive) {
            eprintln!("WARNING: failed to extend watch to {}: {}", path.display(), e);
        }

        let filter = Arc::clone(filter);
        let queue = queue.clone();
        let scan_registry = Arc::clone(scan_registry);
        let shutdown = Arc::clone(shutdown);
        let dir = path.to_path_buf();
        thread::spawn(move || {
            bulk_scan(&dir, &filter, &queue, &scan_registry, &shutdown);
        });
        return;
    }

    if filter.should_track(path) {
        debouncer.schedule(path);
    }
}

fn mark_pending_rename(path: &Path, shared_state: &Arc<Mutex<SharedState>>) {
    {
        let mut state = shared_state.lock().unwrap();
        state
            .pending_renames
            .insert(path.to_path_buf(), Instant::now());
    }

    let path = path.to_path_buf();
    let shared_state = Arc::clone(shared_state);
    thread::spawn(move || {
        thread::sleep(RENAME_WINDOW);
        let mut state = shared_state.lock().unwrap();
        if let Some(&recorded_at) = state.pending_renames.get(&path) {
            if recorded_at.elapsed() >= RENAME_WINDOW {
                state.pending_renames.remove(&path);
            }
        }
    });
}

/// Discards pending entries older than the window, then consumes the
/// oldest remaining entry whose source path was trackable. Returns the
/// matched source path, if any.
fn consume_matching_pending_rename(
    _new_path: &Path,
    filter: &Arc<Filter>,
    shared_state: &Arc<Mutex<SharedState>>,
) -> Option<PathBuf> {
    let mut state = shared_state.lock().unwrap();
    state
        .pending_renames
        .retain(|_, recorded_at| recorded_at.elapsed() < RENAME_WINDOW);

    let candidate = state
        .pending_renames
        .iter()
        .filter(|(path, _)| filter.should_track(path))
        .min_by_key(|(_, recorded_at)| **recorded_at)
        .map(|(path, _)| path.clone());

    if let Some(path) = &candidate {
        state.pending_renames.remove(path);
    }
    candidate
}

fn dispatch_rename(old_path: &Path, new_path: &Path, queue: &JobSender) {
    let job = CaptureJob::Rename {
        old_path: old_path.to_path_buf(),
        new_path: new_path.to_path_buf(),
    };
    if queue.send(job).is_err() {
        eprintln!(
            "WARNING: capture queue closed, dropping rename {} -> {}",
            old_path.display(),
            new_path.display()
        );
    }
}
