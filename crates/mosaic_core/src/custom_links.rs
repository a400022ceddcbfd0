use std::rc::Rc;

use url::Url;

use mosaic_logging::{mosaic_debug, mosaic_trace};

use crate::link_store::LinkStore;
use crate::prefs::SharedPrefs;
use crate::types::{Link, Tile, MAX_NUM_LINKS};

/// Handle returned by [`CustomLinksManager::add_change_listener`];
/// teardown is explicit via `remove_change_listener`.
pub type ListenerId = u64;

/// Origin tag carried by persisted-record change events. Local events
/// are echoes of this manager's own writes and are ignored; Remote
/// events (e.g. a sync-originated update) trigger a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// A batch of history deletions forwarded by the embedder.
#[derive(Debug, Clone, Default)]
pub struct HistoryDeletion {
    /// All browsing history was cleared.
    pub all_history: bool,
    /// The deletion only covers entries that expired by age.
    pub expired: bool,
    /// Specific deleted URLs; ignored when `all_history` is set.
    pub urls: Vec<Url>,
}

/// CRUD + single-level-undo state machine over the user-curated link
/// list, backed by [`LinkStore`].
///
/// Every mutation either fully succeeds (snapshot taken, list updated,
/// record persisted) or returns `false` with no state change. The undo
/// buffer holds exactly one prior state; this is deliberate, not a
/// missing feature.
pub struct CustomLinksManager {
    store: LinkStore,
    initialized: bool,
    current: Vec<Link>,
    previous: Option<Vec<Link>>,
    listeners: Vec<(ListenerId, Rc<dyn Fn()>)>,
    next_listener_id: ListenerId,
}

impl CustomLinksManager {
    /// Restores state from the persisted record, so an initialized list
    /// survives restarts.
    pub fn new(prefs: SharedPrefs) -> Self {
        let store = LinkStore::new(prefs);
        let initialized = store.initialized();
        let current = if initialized { store.retrieve() } else { Vec::new() };
        Self {
            store,
            initialized,
            current,
            previous: None,
            listeners: Vec::new(),
            next_listener_id: 1,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn links(&self) -> &[Link] {
        &self.current
    }

    /// Seeds the list from `seed_tiles` (each marked as most-visited)
    /// and persists it. Fails if already initialized.
    pub fn initialize(&mut self, seed_tiles: &[Tile]) -> bool {
        if self.initialized {
            return false;
        }
        let mut links: Vec<Link> = Vec::new();
        for tile in seed_tiles {
            if links.len() == MAX_NUM_LINKS {
                break;
            }
            if links.iter().any(|link| link.url == tile.url) {
                continue;
            }
            links.push(Link {
                url: tile.url.clone(),
                title: tile.title.clone(),
                is_most_visited: true,
            });
        }
        self.current = links;
        self.previous = None;
        self.store.store(&self.current);
        self.store.set_initialized(true);
        self.initialized = true;
        mosaic_debug!("Initialized custom links with {} seed tiles", self.current.len());
        true
    }

    /// Clears the list, the undo snapshot, and the persisted record.
    pub fn uninitialize(&mut self) {
        self.current.clear();
        self.previous = None;
        self.store.clear();
        self.store.set_initialized(false);
        self.initialized = false;
    }

    pub fn add_link(&mut self, url: &str, title: &str) -> bool {
        if !self.initialized || self.current.len() == MAX_NUM_LINKS {
            return false;
        }
        let Ok(url) = Url::parse(url) else {
            return false;
        };
        if self.current.iter().any(|link| link.url == url) {
            return false;
        }
        self.take_snapshot();
        self.current.push(Link {
            url,
            title: title.to_string(),
            is_most_visited: false,
        });
        self.store.store(&self.current);
        true
    }

    /// Applies the non-empty fields to the link with `url`. Editing a
    /// link always clears its most-visited mark: it is user-authored
    /// from then on.
    pub fn update_link(
        &mut self,
        url: &str,
        new_url: Option<&str>,
        new_title: Option<&str>,
    ) -> bool {
        if !self.initialized {
            return false;
        }
        let new_url = new_url.filter(|candidate| !candidate.is_empty());
        let new_title = new_title.filter(|candidate| !candidate.is_empty());
        if new_url.is_none() && new_title.is_none() {
            return false;
        }
        let Ok(url) = Url::parse(url) else {
            return false;
        };
        let parsed_new_url = match new_url {
            Some(candidate) => match Url::parse(candidate) {
                // The target itself counts as a duplicate here.
                Ok(parsed) => {
                    if self.current.iter().any(|link| link.url == parsed) {
                        return false;
                    }
                    Some(parsed)
                }
                Err(_) => return false,
            },
            None => None,
        };
        let Some(index) = self.current.iter().position(|link| link.url == url) else {
            return false;
        };
        self.take_snapshot();
        let link = &mut self.current[index];
        if let Some(parsed) = parsed_new_url {
            link.url = parsed;
        }
        if let Some(title) = new_title {
            link.title = title.to_string();
        }
        link.is_most_visited = false;
        self.store.store(&self.current);
        true
    }

    /// Moves the link with `url` to `new_pos`, rotating the range in
    /// between so every other link keeps its relative order.
    pub fn reorder_link(&mut self, url: &str, new_pos: usize) -> bool {
        if !self.initialized || new_pos >= self.current.len() {
            return false;
        }
        let Ok(url) = Url::parse(url) else {
            return false;
        };
        let Some(from) = self.current.iter().position(|link| link.url == url) else {
            return false;
        };
        if from == new_pos {
            return false;
        }
        self.take_snapshot();
        if from < new_pos {
            self.current[from..=new_pos].rotate_left(1);
        } else {
            self.current[new_pos..=from].rotate_right(1);
        }
        self.store.store(&self.current);
        true
    }

    pub fn delete_link(&mut self, url: &str) -> bool {
        if !self.initialized {
            return false;
        }
        let Ok(url) = Url::parse(url) else {
            return false;
        };
        let Some(index) = self.current.iter().position(|link| link.url == url) else {
            return false;
        };
        self.take_snapshot();
        self.current.remove(index);
        self.store.store(&self.current);
        true
    }

    /// Restores the single snapshot taken by the last mutation. A
    /// second consecutive call fails.
    pub fn undo(&mut self) -> bool {
        if !self.initialized {
            return false;
        }
        let Some(previous) = self.previous.take() else {
            return false;
        };
        self.current = previous;
        self.store.store(&self.current);
        true
    }

    /// Drops most-visited links whose history entry was deleted.
    /// Expired or empty deletion batches are ignored entirely; any
    /// other batch clears the undo snapshot, even when nothing matched.
    pub fn on_history_deletion(&mut self, deletion: &HistoryDeletion) {
        if !self.initialized || deletion.expired {
            return;
        }
        if !deletion.all_history && deletion.urls.is_empty() {
            return;
        }
        let retained: Vec<Link> = self
            .current
            .iter()
            .filter(|link| {
                if !link.is_most_visited {
                    return true;
                }
                if deletion.all_history {
                    return false;
                }
                !deletion.urls.contains(&link.url)
            })
            .cloned()
            .collect();
        self.previous = None;
        let changed = retained != self.current;
        self.current = retained;
        self.store.store(&self.current);
        if changed {
            mosaic_trace!("History deletion removed custom links; notifying listeners");
            self.notify_listeners();
        }
    }

    /// Handles a persisted-record change event. Local-origin events are
    /// echoes of this manager's own writes; remote-origin events make
    /// the manager re-read its state and notify listeners.
    pub fn on_store_changed(&mut self, origin: ChangeOrigin) {
        if origin == ChangeOrigin::Local {
            return;
        }
        self.initialized = self.store.initialized();
        self.current = if self.initialized {
            self.store.retrieve()
        } else {
            Vec::new()
        };
        self.previous = None;
        self.notify_listeners();
    }

    pub fn add_change_listener(&mut self, listener: Rc<dyn Fn()>) -> ListenerId {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_change_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
    }

    fn take_snapshot(&mut self) {
        self.previous = Some(self.current.clone());
    }

    fn notify_listeners(&self) {
        let listeners: Vec<Rc<dyn Fn()>> = self
            .listeners
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener();
        }
    }
}
