#![allow(dead_code)]

use durastore::providers::sqlite::SqliteProvider;
use durastore::providers::Provider;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub fn init_tracing() {
    durastore::logging::init_tracing("durastore=debug");
}

pub async fn create_sqlite_store_disk() -> (Arc<dyn Provider>, TempDir) {
    let td = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite:{}", td.path().join("test.db").display());
    let store = Arc::new(SqliteProvider::new(&db_url, None).await.unwrap()) as Arc<dyn Provider>;
    (store, td)
}

/// Hands out a fresh database file per provider inside one temporary directory.
pub struct SqliteFiles {
    dir: TempDir,
    next: AtomicUsize,
}

impl SqliteFiles {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            next: AtomicUsize::new(0),
        }
    }

    pub async fn open(&self) -> Arc<dyn Provider> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let db_url = format!("sqlite:{}", self.dir.path().join(format!("store-{n}.db")).display());
        Arc::new(SqliteProvider::new(&db_url, None).await.unwrap())
    }
}
