use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use mosaic_logging::mosaic_warn;

use crate::prefs::{keys, PrefStore, SharedPrefs};
use crate::types::Link;

/// Wire shape of one persisted link.
#[derive(Debug, Serialize, Deserialize)]
struct StoredLink {
    url: String,
    title: String,
    is_most_visited: bool,
}

/// Codec between the persisted ordered record and the in-memory link
/// list. Corruption of any entry is treated as corruption of the whole
/// list: the record is cleared and an empty list returned, never a
/// partial one.
pub struct LinkStore {
    prefs: SharedPrefs,
}

impl LinkStore {
    pub fn new(prefs: SharedPrefs) -> Self {
        Self { prefs }
    }

    /// Deserializes the persisted record. A missing record is an empty
    /// list; a malformed record is cleared fail-safe.
    pub fn retrieve(&self) -> Vec<Link> {
        let raw = match self.prefs.borrow().get(keys::CUSTOM_LINKS_LIST) {
            Some(value) => value,
            None => return Vec::new(),
        };
        match decode_links(raw) {
            Some(links) => links,
            None => {
                mosaic_warn!("Persisted custom-link list is corrupt; clearing it");
                self.clear();
                Vec::new()
            }
        }
    }

    /// Serializes the full list, overwriting any prior record.
    pub fn store(&self, links: &[Link]) {
        let stored: Vec<StoredLink> = links
            .iter()
            .map(|link| StoredLink {
                url: link.url.to_string(),
                title: link.title.clone(),
                is_most_visited: link.is_most_visited,
            })
            .collect();
        let value = serde_json::to_value(stored).unwrap_or(Value::Array(Vec::new()));
        self.prefs.borrow_mut().set(keys::CUSTOM_LINKS_LIST, value);
    }

    /// Removes the record entirely.
    pub fn clear(&self) {
        self.prefs.borrow_mut().remove(keys::CUSTOM_LINKS_LIST);
    }

    pub fn initialized(&self) -> bool {
        self.prefs
            .borrow()
            .get(keys::CUSTOM_LINKS_INITIALIZED)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.prefs
            .borrow_mut()
            .set(keys::CUSTOM_LINKS_INITIALIZED, Value::Bool(initialized));
    }
}

fn decode_links(raw: Value) -> Option<Vec<Link>> {
    let stored: Vec<StoredLink> = serde_json::from_value(raw).ok()?;
    let mut links = Vec::with_capacity(stored.len());
    for entry in stored {
        let url = Url::parse(&entry.url).ok()?;
        links.push(Link {
            url,
            title: entry.title,
            is_most_visited: entry.is_most_visited,
        });
    }
    Some(links)
}
