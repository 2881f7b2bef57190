//! Capture Worker & Persistence.
//!
//! `capture_procedure` implements the per-file gating that runs when a
//! debounce timer fires or the bulk scanner visits a file. `CaptureWorker`
//! is the single consumer that drains the bounded queue, batches jobs
//! into one transaction, retries on transient lock contention, and emits
//! notifications. The bulk scanner walks a newly observed directory and
//! feeds the same procedure, bypassing the debouncer.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::filter::{looks_binary, Filter};
use crate::notify_sink::Notifier;
use crate::store::{SaveItem, Store};

pub const QUEUE_CAPACITY: usize = 10_000;
const MAX_BATCH_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub enum CaptureJob {
    Save {
        path: PathBuf,
        bytes: Vec<u8>,
        retention: u32,
    },
    Rename {
        old_path: PathBuf,
        new_path: PathBuf,
    },
}

pub type JobSender = SyncSender<CaptureJob>;

pub fn new_queue() -> (JobSender, Receiver<CaptureJob>) {
    std::sync::mpsc::sync_channel(QUEUE_CAPACITY)
}

/// Runs when a debounce timer fires or the bulk scanner visits a path.
/// Aborts silently on any ineligibility; the only
/// observable effect of an eligible file is a job pushed onto `queue`.
/// Producers block when the queue is full - the system's backpressure
/// mechanism.
pub fn capture_procedure(path: &Path, filter: &Filter, queue: &JobSender) {
    let Some(group) = filter.group_of(path) else {
        return;
    };

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };
    if !metadata.is_file() {
        return;
    }

    let size = metadata.len();
    if size > group.max_file_size {
        return;
    }
    if size == 0 {
        return;
    }

    let content = match std::fs::read(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("WARNING: capture read failed for {}: {}", path.display(), e);
            return;
        }
    };

    if looks_binary(&content) {
        return;
    }

    let job = CaptureJob::Save {
        path: path.to_path_buf(),
        bytes: content,
        retention: group.max_snapshots,
    };
    // A full queue blocks the caller; this is deliberate backpressure.
    if queue.send(job).is_err() {
        eprintln!("WARNING: capture queue closed, dropping {}", path.display());
    }
}

pub struct CaptureWorker {
    store: Arc<Store>,
    notifier: Arc<dyn Notifier>,
    receiver: Receiver<CaptureJob>,
    shutdown: Arc<AtomicBool>,
}

impl CaptureWorker {
    pub fn new(
        store: Arc<Store>,
        notifier: Arc<dyn Notifier>,
        receiver: Receiver<CaptureJob>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            notifier,
            receiver,
            shutdown,
        }
    }

    /// Single-consumer loop: take the first job, opportunistically drain
    /// everything else currently available, split into saves/renames,
    /// commit saves as one transaction with whole-batch retry on
    /// transient lock contention, then apply renames the same way.
    /// Drains remaining jobs as one final batch on shutdown.
    pub fn run(&self) {
        loop {
            let first = match self.receiver.recv_timeout(Duration::from_millis(200)) {
                Ok(job) => job,
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    continue;
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
            };

            let mut batch = vec![first];
            while let Ok(job) = self.receiver.try_recv() {
                batch.push(job);
                if batch.len() >= QUEUE_CAPACITY {
                    break;
                }
            }

            self.process_batch(batch);

            if self.shutdown.load(Ordering::SeqCst) {
                // Drain whatever else is already queued, then exit.
                let mut final_batch = Vec::new();
                while let Ok(job) = self.receiver.try_recv() {
                    final_batch.push(job);
                }
                if !final_batch.is_empty() {
                    self.process_batch(final_batch);
                }
                return;
            }
        }
    }

    fn process_batch(&self, batch: Vec<CaptureJob>) {
        let mut saves = Vec::new();
        let mut renames = Vec::new();
        for job in batch {
            match job {
                CaptureJob::Save {
                    path,
                    bytes,
                    retention,
                } => saves.push(SaveItem {
                    path: path.to_string_lossy().to_string(),
                    bytes,
                    retention,
                }),
                CaptureJob::Rename { old_path, new_path } => renames.push((old_path, new_path)),
            }
        }

        if !saves.is_empty() {
            self.commit_saves(saves);
        }
        for (old_path, new_path) in renames {
            self.commit_rename(old_path, new_path);
        }
    }

    fn commit_saves(&self, items: Vec<SaveItem>) {
        let mut attempt = 0;
        loop {
            match self.store.save_snapshot_batch(&items) {
                Ok(outcomes) => {
                    for (item, outcome) in items.iter().zip(outcomes.iter()) {
                        if outcome.saved {
                            self.notifier.notify_save(Path::new(&item.path));
                        } else if let Some(err) = &outcome.error {
                            eprintln!("ERROR: save failed for {}: {}", item.path, err);
                        }
                    }
                    return;
                }
                Err(e) if e.is_transient_lock() && attempt < MAX_BATCH_RETRIES => {
                    attempt += 1;
                    thread::sleep(RETRY_BACKOFF);
                }
                Err(e) => {
                    for item in &items {
                        eprintln!("ERROR: save batch failed for {}: {}", item.path, e);
                    }
                    return;
                }
            }
        }
    }

    fn commit_rename(&self, old_path: PathBuf, new_path: PathBuf) {
        let mut attempt = 0;
        loop {
            match self
                .store
                .save_rename(&old_path.to_string_lossy(), &new_path.to_string_lossy())
            {
                Ok(Some(_)) => {
                    self.notifier.notify_rename(&old_path, &new_path);
                    return;
                }
                Ok(None) => return,
                Err(e) if e.is_transient_lock() && attempt < MAX_BATCH_RETRIES => {
                    attempt += 1;
                    thread::sleep(RETRY_BACKOFF);
                }
                Err(e) => {
                    eprintln!(
                        "ERROR: rename save failed for {} -> {}: {}",
                        old_path.display(),
                        new_path.display(),
                        e
                    );
                    return;
                }
            }
        }
    }
}

/// Prevents two scans of the same directory from overlapping: a per-root
/// registry guarded by its own mutex, distinct from the
/// debouncer/pending-rename mutex.
#[derive(Default)]
pub struct ScanRegistry {
    active: Mutex<HashSet<PathBuf>>,
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `dir` for scanning; `false` if a scan is already
    /// registered (the caller should return immediately).
    fn try_register(&self, dir: &Path) -> bool {
        self.active.lock().unwrap().insert(dir.to_path_buf())
    }

    fn unregister(&self, dir: &Path) {
        self.active.lock().unwrap().remove(dir);
    }
}

/// Walks `dir` recursively, feeding every regular file to
/// `capture_procedure` immediately (no debounce - these files had no
/// prior in-flight events). Honours `shutdown`, checked between
/// directory entries, and a per-root registry that no-ops a second scan
/// of the same directory.
pub fn bulk_scan(
    dir: &Path,
    filter: &Filter,
    queue: &JobSender,
    registry: &ScanRegistry,
    shutdown: &AtomicBool,
) {
    if !registry.try_register(dir) {
        return;
    }

    for entry in walkdir::WalkDir::new(dir).into_iter().filter_entry(|e| {
        if e.file_type().is_dir() {
            !filter.is_excluded_dir(e.path())
        } else {
            true
        }
    }) {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        if !filter.should_track(entry.path()) {
            continue;
        }
        capture_procedure(entry.path(), filter, queue);
    }

    registry.unregister(dir);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RawConfig, RawWatchGroup};
    use tempfile::TempDir;

    fn single_group_config(dir: &Path, max_size: u64, max_snapshots: u32) -> Config {
        Config::from_raw(RawConfig {
            db_path: PathBuf::from("/tmp/db"),
            watch_groups: vec![RawWatchGroup {
                name: "g".into(),
                dirs: vec![dir.to_path_buf()],
                extensions: None,
                exclude_patterns: None,
                debounce_sec: None,
                max_file_size: Some(max_size),
                max_snapshots: Some(max_snapshots),
            }],
        })
        .unwrap()
    }

    #[test]
    fn capture_procedure_skips_empty_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("empty.txt");
        std::fs::write(&file, b"").unwrap();
        let filter = Filter::new(single_group_config(dir.path(), 1024, 0));
        let (tx, rx) = new_queue();
        capture_procedure(&file, &filter, &tx);
        drop(tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn capture_procedure_skips_oversized_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("big.txt");
        std::fs::write(&file, vec![b'a'; 20]).unwrap();
        let filter = Filter::new(single_group_config(dir.path(), 10, 0));
        let (tx, rx) = new_queue();
        capture_procedure(&file, &filter, &tx);
        drop(tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn capture_procedure_skips_binary_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("bin.dat");
        std::fs::write(&file, [0x89, 0x50, 0x4E, 0x47, 0x00]).unwrap();
        let filter = Filter::new(single_group_config(dir.path(), 1024, 0));
        let (tx, rx) = new_queue();
        capture_procedure(&file, &filter, &tx);
        drop(tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn capture_procedure_enqueues_eligible_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("ok.txt");
        std::fs::write(&file, b"hello").unwrap();
        let filter = Filter::new(single_group_config(dir.path(), 1024, 0));
        let (tx, rx) = new_queue();
        capture_procedure(&file, &filter, &tx);
        match rx.try_recv().unwrap() {
            CaptureJob::Save { path, bytes, .. } => {
                assert_eq!(path, file);
                assert_eq!(bytes, b"hello");
            }
            _ => panic!("expected Save job"),
        }
    }
}
