use std::{
    path::PathBuf,
    sync::{Arc, Once, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    heap::{BufferPool, DEFAULT_PAGES},
    transaction::ConcurrentStatus,
    tx_log::LogManager,
    types::Pod,
    utils::HandyRwLock,
};

use super::Catalog;

/// We collect all process-wide state here.
///
/// These variables cannot be initialized as plain statics, because
/// their initialization relies on non-const functions (e.g.
/// `HashMap::new()`), so the instance lives behind a lazily
/// initialized pointer.
///
/// Guard acquisition order, for functions that need more than one:
/// buffer_pool -> log_manager -> catalog -> concurrent_status.
/// Page guards come after all of them and are never held across a
/// pool acquisition.
pub struct Database {
    path: PathBuf,

    buffer_pool: Pod<BufferPool>,
    catalog: Pod<Catalog>,
    concurrent_status: Pod<ConcurrentStatus>,
    log_manager: Pod<LogManager>,
}

static mut SINGLETON: *mut Database = std::ptr::null_mut();

impl Database {
    fn new() -> Self {
        let db_path = PathBuf::from("data").join("default_db");
        if !db_path.exists() {
            std::fs::create_dir_all(&db_path).expect("failed to create the database directory");
        }

        let log_path = db_path.join("wal.log");
        let log_manager = LogManager::new(&log_path).expect("failed to open the log file");

        Self {
            path: db_path,

            buffer_pool: Arc::new(RwLock::new(BufferPool::new(DEFAULT_PAGES))),
            catalog: Arc::new(RwLock::new(Catalog::new())),
            concurrent_status: Arc::new(RwLock::new(ConcurrentStatus::new())),
            log_manager: Arc::new(RwLock::new(log_manager)),
        }
    }

    /// Swap in a fresh instance, dropping caches, catalog, latch
    /// table and the log positions (the table files themselves are
    /// untouched). For tests mostly; callers must make sure no other
    /// thread is inside the engine.
    pub fn reset() {
        let singleton = Self::new();

        unsafe {
            if !SINGLETON.is_null() {
                drop(Box::from_raw(SINGLETON));
            }
            SINGLETON = Box::into_raw(Box::new(singleton));
        }

        Database::mut_log_manager()
            .reset()
            .expect("failed to reset the log file");
    }

    pub fn global() -> &'static Self {
        static ONCE: Once = Once::new();

        ONCE.call_once(|| unsafe {
            // `reset` may already have installed an instance
            if SINGLETON.is_null() {
                SINGLETON = Box::into_raw(Box::new(Self::new()));
            }
        });

        unsafe { SINGLETON.as_ref().unwrap() }
    }

    pub fn buffer_pool() -> RwLockReadGuard<'static, BufferPool> {
        Self::global().buffer_pool.rl()
    }

    pub fn mut_buffer_pool() -> RwLockWriteGuard<'static, BufferPool> {
        Self::global().buffer_pool.wl()
    }

    pub fn catalog() -> RwLockReadGuard<'static, Catalog> {
        Self::global().catalog.rl()
    }

    pub fn mut_catalog() -> RwLockWriteGuard<'static, Catalog> {
        Self::global().catalog.wl()
    }

    pub fn concurrent_status() -> RwLockReadGuard<'static, ConcurrentStatus> {
        Self::global().concurrent_status.rl()
    }

    pub fn mut_concurrent_status() -> RwLockWriteGuard<'static, ConcurrentStatus> {
        Self::global().concurrent_status.wl()
    }

    pub fn log_manager() -> RwLockReadGuard<'static, LogManager> {
        Self::global().log_manager.rl()
    }

    pub fn mut_log_manager() -> RwLockWriteGuard<'static, LogManager> {
        Self::global().log_manager.wl()
    }

    pub fn get_path(&self) -> PathBuf {
        self.path.clone()
    }
}
