//! Keeps a `PoolCacheStatus` fresh in the background.
//!
//! Filesystem changes below the project pool or the pools it includes are
//! debounced, then a worker thread rescans. The worker fills
//! `status_thread` under a mutex and wakes the owner through the dispatcher
//! channel; the owner swaps the snapshot in from `poll`/`wait` and joins the
//! worker. At most one scan is outstanding; there is no cancellation, a
//! scan always runs to completion.

use crate::cache_status::PoolCacheStatus;
use crate::Result;
use hpool_core::dependency_graph::PoolDependencyGraph;
use hpool_core::manager::PoolManager;
use hpool_core::PoolInfo;
use hpool_db::POOL_DB;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct PoolCacheMonitor {
    base_path: PathBuf,
    manager: Arc<PoolManager>,
    status: Arc<PoolCacheStatus>,
    status_thread: Arc<Mutex<Option<PoolCacheStatus>>>,
    worker: Option<JoinHandle<()>>,
    dispatcher_tx: Sender<()>,
    dispatcher_rx: Receiver<()>,
    _debouncer: Debouncer<RecommendedWatcher>,
    fs_rx: Receiver<DebounceEventResult>,
}

impl PoolCacheMonitor {
    /// Starts watching the project pool at `base_path` and the pools it
    /// includes. No scan runs until a change is seen or `update_now` is called.
    pub fn new(base_path: &Path, manager: Arc<PoolManager>, debounce: Duration) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let (fs_tx, fs_rx) = mpsc::channel();
        let mut debouncer = new_debouncer(debounce, fs_tx)?;

        for dir in watched_dirs(&base_path, &manager) {
            match debouncer.watcher().watch(&dir, RecursiveMode::Recursive) {
                Ok(()) => debug!("Watching {:?}", dir),
                Err(e) => warn!("Can't watch {:?}: {}", dir, e),
            }
        }

        let (dispatcher_tx, dispatcher_rx) = mpsc::channel();
        Ok(Self {
            base_path,
            manager,
            status: Arc::new(PoolCacheStatus::default()),
            status_thread: Arc::new(Mutex::new(None)),
            worker: None,
            dispatcher_tx,
            dispatcher_rx,
            _debouncer: debouncer,
            fs_rx,
        })
    }

    /// The latest published snapshot.
    pub fn get_status(&self) -> Arc<PoolCacheStatus> {
        self.status.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.worker.is_some()
    }

    /// Rescans without waiting for a filesystem change.
    pub fn update_now(&mut self) {
        self.really_update();
    }

    fn really_update(&mut self) {
        if self.worker.is_some() {
            debug!("Cache scan already running");
            return;
        }
        let base_path = self.base_path.clone();
        let manager = self.manager.clone();
        let slot = self.status_thread.clone();
        let dispatcher = self.dispatcher_tx.clone();
        self.worker = Some(std::thread::spawn(move || {
            let status = PoolCacheStatus::from_project_pool_path(&base_path, manager);
            *slot.lock() = Some(status);
            if dispatcher.send(()).is_err() {
                warn!("Cache monitor gone, dropping scan result");
            }
        }));
    }

    /// Handles pending filesystem events and finished scans without
    /// blocking. Returns true if a new snapshot was published.
    pub fn poll(&mut self) -> bool {
        if self.drain_fs_events() {
            self.really_update();
        }
        match self.dispatcher_rx.try_recv() {
            Ok(()) => {
                self.publish();
                true
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }

    /// Like `poll`, but blocks up to `timeout` for a scan to finish.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        if self.drain_fs_events() {
            self.really_update();
        }
        match self.dispatcher_rx.recv_timeout(timeout) {
            Ok(()) => {
                self.publish();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn publish(&mut self) {
        if let Some(status) = self.status_thread.lock().take() {
            info!(
                "Pool cache: {} items, {} out of date, {} missing",
                status.n_total, status.n_out_of_date, status.n_missing
            );
            self.status = Arc::new(status);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Cache scan thread panicked");
            }
        }
    }

    /// True if any relevant change arrived. The index's own files are
    /// ignored, reading it touches them.
    fn drain_fs_events(&mut self) -> bool {
        let mut changed = false;
        loop {
            match self.fs_rx.try_recv() {
                Ok(Ok(events)) => {
                    changed |= events
                        .iter()
                        .filter(|e| e.kind == DebouncedEventKind::Any)
                        .any(|e| !is_index_file(&e.path));
                }
                Ok(Err(e)) => warn!("File watcher error: {}", e),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("File watcher disconnected");
                    break;
                }
            }
        }
        changed
    }
}

impl Drop for PoolCacheMonitor {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Cache scan thread panicked");
            }
        }
    }
}

fn is_index_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with(POOL_DB))
        .unwrap_or(false)
}

/// The project pool and every pool it can reach.
fn watched_dirs(base_path: &Path, manager: &PoolManager) -> Vec<PathBuf> {
    let Ok(info) = PoolInfo::load(base_path) else {
        return vec![base_path.to_path_buf()];
    };
    let graph = PoolDependencyGraph::new(&info, manager);
    match graph.get_sorted() {
        Ok(pools) => pools.iter().map(|p| p.base_path.clone()).collect(),
        Err(e) => {
            warn!("{}", e);
            vec![base_path.to_path_buf()]
        }
    }
}
