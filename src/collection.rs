//! The collection module provides the facades that tie a backend, a worker
//! pool and an entity registry together into one addressable music source.
//!
//! A collection is the unit of identity consumers see: it hands out query
//! makers bound to its backend, re-enumerates the backend on demand, and
//! signals its own removal when the backend goes away so stale references
//! get dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock};

use tracing::{info, warn};

use crate::clientlib::ThreadRegistrar;
use crate::config::{Config, DeviceSource};
use crate::errors::{Result, ViolaError};
use crate::job::WorkerPool;
use crate::memory::{demarshal_records_into, DeviceRecord, MemoryStrategy};
use crate::query::QueryMaker;
use crate::registry::{EntityRegistry, RegistryMaps};
use crate::sql::{maybe_create_database, scan_all_tracks, SqlDriver, SqlStrategy, SqliteDriver};

/// One-shot removal notification, fired when a collection's backend is
/// gone. Fires at most once regardless of how many jobs observe the loss.
pub struct RemovalSignal {
    subscribers: Mutex<Vec<mpsc::Sender<String>>>,
    fired: AtomicBool,
}

impl Default for RemovalSignal {
    fn default() -> Self {
        RemovalSignal::new()
    }
}

impl RemovalSignal {
    pub fn new() -> RemovalSignal {
        RemovalSignal { subscribers: Mutex::new(Vec::new()), fired: AtomicBool::new(false) }
    }

    pub fn subscribe(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub(crate) fn fire(&self, collection_id: &str) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(collection_id, "collection backend lost; signalling removal");
        for tx in self.subscribers.lock().unwrap().iter() {
            let _ = tx.send(collection_id.to_string());
        }
    }
}

/// Outcome of a full scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed { track_count: usize },
    Failed,
}

/// Completion handle for a full scan running on the worker pool.
pub struct ScanHandle {
    rx: mpsc::Receiver<ScanOutcome>,
}

impl ScanHandle {
    pub fn wait(&self) -> Result<ScanOutcome> {
        self.rx
            .recv()
            .map_err(|_| ViolaError::Generic("scan worker disappeared before delivering a result".to_string()))
    }
}

/// One addressable music data source.
pub trait Collection: Send + Sync {
    /// Stable identity string consumers use to address this source.
    fn collection_id(&self) -> &str;

    /// Human-readable name.
    fn collection_name(&self) -> &str;

    /// A fresh query maker bound to this collection's backend and registry.
    fn query_maker(&self) -> QueryMaker;

    /// Re-enumerate the backend on the worker pool and rebuild the registry
    /// by atomic batch replacement.
    fn start_full_scan(&self) -> ScanHandle;

    /// Drop the backend. In-flight queries complete with an empty result;
    /// the removal signal fires.
    fn disconnect(&self);

    fn subscribe_removal(&self) -> mpsc::Receiver<String>;
}

/// Collection over a relational backend.
pub struct SqlCollection {
    id: String,
    name: String,
    driver: Arc<dyn SqlDriver>,
    registry: Arc<EntityRegistry>,
    pool: Arc<WorkerPool>,
    registrar: Option<Arc<ThreadRegistrar>>,
    removal: Arc<RemovalSignal>,
    unknown_label: String,
}

impl SqlCollection {
    pub fn new(
        id: &str,
        name: &str,
        driver: Arc<dyn SqlDriver>,
        pool: Arc<WorkerPool>,
        unknown_label: &str,
    ) -> Arc<SqlCollection> {
        let registrar = driver.client_library().map(|library| Arc::new(ThreadRegistrar::new(library)));
        Arc::new(SqlCollection {
            id: id.to_string(),
            name: name.to_string(),
            driver,
            registry: Arc::new(EntityRegistry::default()),
            pool,
            registrar,
            removal: Arc::new(RemovalSignal::new()),
            unknown_label: unknown_label.to_string(),
        })
    }

    /// Open the local library collection described by the config, creating
    /// or migrating the database as needed.
    pub fn open(c: &Config, pool: Arc<WorkerPool>) -> Result<Arc<SqlCollection>> {
        maybe_create_database(c)?;
        let driver = Arc::new(SqliteDriver::open(&c.library_database_path)?);
        let id = format!("sql://{}", c.library_database_path.display());
        Ok(SqlCollection::new(&id, "Local Library", driver, pool, &c.unknown_label))
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn driver(&self) -> &Arc<dyn SqlDriver> {
        &self.driver
    }
}

impl Collection for SqlCollection {
    fn collection_id(&self) -> &str {
        &self.id
    }

    fn collection_name(&self) -> &str {
        &self.name
    }

    fn query_maker(&self) -> QueryMaker {
        QueryMaker::new(
            Arc::new(SqlStrategy::new(Arc::clone(&self.driver))),
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            self.registrar.clone(),
            Arc::clone(&self.removal),
            self.id.clone(),
            self.unknown_label.clone(),
        )
    }

    fn start_full_scan(&self) -> ScanHandle {
        let (tx, rx) = mpsc::channel();
        let driver = Arc::clone(&self.driver);
        let registry = Arc::clone(&self.registry);
        let registrar = self.registrar.clone();
        let removal = Arc::clone(&self.removal);
        let collection_id = self.id.clone();
        let unknown_label = self.unknown_label.clone();
        let abort = AtomicBool::new(false);
        self.pool.spawn(move || {
            if let Some(registrar) = &registrar {
                registrar.ensure_initialized();
            }
            match scan_all_tracks(driver.as_ref(), &registry, &unknown_label, &abort) {
                Ok(track_count) => {
                    let _ = tx.send(ScanOutcome::Completed { track_count });
                }
                Err(e) => {
                    warn!(collection_id = %collection_id, error = %e, "full scan failed");
                    if !driver.is_connected() {
                        removal.fire(&collection_id);
                    }
                    let _ = tx.send(ScanOutcome::Failed);
                }
            }
        });
        ScanHandle { rx }
    }

    fn disconnect(&self) {
        self.driver.disconnect();
        self.removal.fire(&self.id);
    }

    fn subscribe_removal(&self) -> mpsc::Receiver<String> {
        self.removal.subscribe()
    }
}

/// Collection over an in-memory record snapshot from a mounted device or a
/// resolved service catalog. The entity graph is built up-front on mount so
/// non-track queries return fully cross-referenced entities.
pub struct DeviceCollection {
    id: String,
    name: String,
    records: Arc<RwLock<Vec<DeviceRecord>>>,
    connected: Arc<AtomicBool>,
    registry: Arc<EntityRegistry>,
    pool: Arc<WorkerPool>,
    removal: Arc<RemovalSignal>,
    unknown_label: String,
}

impl DeviceCollection {
    pub fn new(
        source: &DeviceSource,
        records: Vec<DeviceRecord>,
        pool: Arc<WorkerPool>,
        unknown_label: &str,
    ) -> Arc<DeviceCollection> {
        let registry = Arc::new(EntityRegistry::default());
        let mut maps = RegistryMaps::default();
        demarshal_records_into(&records, &mut maps, registry.compilation_policy(), &registry);
        registry.replace_all(maps);
        info!(source_id = %source.id, tracks = records.len(), "device collection mounted");

        Arc::new(DeviceCollection {
            id: format!("device://{}", source.id),
            name: source.name.clone(),
            records: Arc::new(RwLock::new(records)),
            connected: Arc::new(AtomicBool::new(true)),
            registry,
            pool,
            removal: Arc::new(RemovalSignal::new()),
            unknown_label: unknown_label.to_string(),
        })
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Replace the record snapshot, e.g. after the device resyncs. The
    /// registry is rebuilt on the next full scan.
    pub fn update_records(&self, records: Vec<DeviceRecord>) {
        *self.records.write().unwrap() = records;
    }
}

impl Collection for DeviceCollection {
    fn collection_id(&self) -> &str {
        &self.id
    }

    fn collection_name(&self) -> &str {
        &self.name
    }

    fn query_maker(&self) -> QueryMaker {
        QueryMaker::new(
            Arc::new(MemoryStrategy::new(Arc::clone(&self.records), Arc::clone(&self.connected))),
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            None,
            Arc::clone(&self.removal),
            self.id.clone(),
            self.unknown_label.clone(),
        )
    }

    fn start_full_scan(&self) -> ScanHandle {
        let (tx, rx) = mpsc::channel();
        let records = Arc::clone(&self.records);
        let connected = Arc::clone(&self.connected);
        let registry = Arc::clone(&self.registry);
        let removal = Arc::clone(&self.removal);
        let collection_id = self.id.clone();
        self.pool.spawn(move || {
            if !connected.load(Ordering::SeqCst) {
                warn!(collection_id = %collection_id, "full scan failed: device store is detached");
                removal.fire(&collection_id);
                let _ = tx.send(ScanOutcome::Failed);
                return;
            }
            let snapshot = records.read().unwrap().clone();
            let mut maps = RegistryMaps::default();
            demarshal_records_into(&snapshot, &mut maps, registry.compilation_policy(), &registry);
            registry.replace_all(maps);
            let _ = tx.send(ScanOutcome::Completed { track_count: snapshot.len() });
        });
        ScanHandle { rx }
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.removal.fire(&self.id);
    }

    fn subscribe_removal(&self) -> mpsc::Receiver<String> {
        self.removal.subscribe()
    }
}
