//! The core's single owner object: holds the Store, the Filter, the
//! capture queue, the shared timer/pending-rename state, the bulk-scan
//! registry, the notifier, and the shutdown flag. Start-up wires the
//! Ingestor, Debouncer and Capture Worker together over that shared
//! state; shutdown stops them in a fixed order.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::capture::{new_queue, CaptureWorker, JobSender, ScanRegistry};
use crate::config::Config;
use crate::debounce::{Debouncer, SharedState};
use crate::error::LochistError;
use crate::filter::Filter;
use crate::notify_sink::Notifier;
use crate::store::Store;
use crate::watcher::Ingestor;

/// Ties every cooperating component to one lifetime. Construct with
/// `Service::start`, run until told to stop, then call `shutdown`.
pub struct Service {
    store: Arc<Store>,
    filter: Arc<Filter>,
    queue: JobSender,
    shutdown: Arc<AtomicBool>,
    ingestor: Option<Ingestor>,
    debouncer: Arc<Debouncer>,
    worker_handle: Option<thread::JoinHandle<()>>,
}

impl Service {
    pub fn start(config: Config, notifier: Arc<dyn Notifier>) -> Result<Self, LochistError> {
        let db_path: PathBuf = config.db_path.clone();
        let store = Arc::new(Store::open(&db_path)?);
        let filter = Arc::new(Filter::new(config.clone()));

        let (queue, receiver) = new_queue();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shared_state = Arc::new(Mutex::new(SharedState::new()));
        let scan_registry = Arc::new(ScanRegistry::new());

        let debouncer = Arc::new(Debouncer::new(
            Arc::clone(&shared_state),
            Arc::clone(&filter),
            queue.clone(),
            Arc::clone(&shutdown),
        ));

        let worker = CaptureWorker::new(
            Arc::clone(&store),
            notifier,
            receiver,
            Arc::clone(&shutdown),
        );
        let worker_handle = thread::spawn(move || worker.run());

        let ingestor = Ingestor::start(
            &config,
            Arc::clone(&filter),
            Arc::clone(&debouncer),
            shared_state,
            queue.clone(),
            scan_registry,
            Arc::clone(&shutdown),
        )?;

        Ok(Self {
            store,
            filter,
            queue,
            shutdown,
            ingestor: Some(ingestor),
            debouncer,
            worker_handle: Some(worker_handle),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn filter(&self) -> &Arc<Filter> {
        &self.filter
    }

    /// Requests shutdown and blocks until every component has stopped:
    /// timers first, then pending-rename state, then the worker drains
    /// its final batch, and the OS subscription is released last.
    pub fn shutdown(mut self) {
        self.debouncer.stop_all();
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
        if let Some(ingestor) = self.ingestor.take() {
            ingestor.shutdown();
        }
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn queue(&self) -> &JobSender {
        &self.queue
    }
}
