use strata_store::{KeyStore, StoreConfig};
use tempfile::TempDir;

/// A KeyStore in a temp directory, kept alive for the test's duration.
pub struct TestStore {
    pub store: KeyStore,
    pub _dir: TempDir,
}

impl TestStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::open(dir.path().join("docs.db"), config).expect("failed to open store");
        Self { store, _dir: dir }
    }
}
