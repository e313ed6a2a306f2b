use crate::infrastructure::storage::initialize_database;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_TEMP_DIR: AtomicUsize = AtomicUsize::new(0);

pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let sequence = NEXT_TEMP_DIR.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!(
        "{prefix}-{}-{}",
        std::process::id(),
        sequence
    ));
    fs::create_dir_all(&path).expect("create temp dir");
    path
}

/// Schema-initialised SQLite file in a throwaway directory.
pub struct TempDatabase {
    dir: PathBuf,
    path: PathBuf,
}

impl TempDatabase {
    pub fn new() -> Self {
        let dir = unique_temp_dir("studytrack-db-tests");
        let path = dir.join("test.sqlite");
        initialize_database(&path).expect("initialize database");
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDatabase {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}
