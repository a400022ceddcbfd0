use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::Value;

/// Keys of the persisted records consumed by this workspace. The store
/// itself (preference file IO, sync) is an external collaborator.
pub mod keys {
    /// Whether the custom-links manager has been initialized.
    pub const CUSTOM_LINKS_INITIALIZED: &str = "custom-links.initialized";
    /// The ordered list of custom links.
    pub const CUSTOM_LINKS_LIST: &str = "custom-links.list";
    /// Count of non-popular tiles in the last tile save.
    pub const NUM_PERSONAL_SUGGESTIONS: &str = "ntp.num_personal_suggestions";

    pub const POPULAR_SITES_OVERRIDE_URL: &str = "popular_sites.override_url";
    pub const POPULAR_SITES_OVERRIDE_DIRECTORY: &str = "popular_sites.override_directory";
    pub const POPULAR_SITES_OVERRIDE_COUNTRY: &str = "popular_sites.override_country";
    pub const POPULAR_SITES_OVERRIDE_VERSION: &str = "popular_sites.override_version";

    /// Cached popular-sites catalog blob.
    pub const SUGGESTED_SITES_JSON: &str = "suggested_sites_json";
    /// Version the cached catalog was parsed with.
    pub const SUGGESTED_SITES_VERSION: &str = "suggested_sites_version";
    /// URL the cached catalog was fetched from.
    pub const SUGGESTED_SITES_URL: &str = "suggested_sites_url";
    /// Unix milliseconds of the last successful download.
    pub const SUGGESTED_SITES_LAST_DOWNLOAD: &str = "suggested_sites_last_download";
}

/// Seam to the external ordered key-value record store.
pub trait PrefStore {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value);
    fn remove(&mut self, key: &str);
}

/// Shared handle to a preference store. The engine is single-threaded by
/// construction, so `Rc<RefCell<_>>` is the whole synchronization story.
pub type SharedPrefs = Rc<RefCell<dyn PrefStore>>;

/// In-memory store for tests and embedders without a preference service.
#[derive(Debug, Default)]
pub struct MemoryPrefStore {
    values: BTreeMap<String, Value>,
}

impl MemoryPrefStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor producing a ready-to-share handle.
    pub fn shared() -> SharedPrefs {
        Rc::new(RefCell::new(Self::new()))
    }
}

impl PrefStore for MemoryPrefStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}
