use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use serde_json::Value;
use url::Url;

use mosaic_core::{
    generate_short_title, is_host_or_mobile_page_known, keys, ChangeOrigin, CustomLinksManager,
    HistoryDeletion, MostVisitedUrl, PopularSite, PrefStore, SectionType, SharedPrefs, Tile,
    TileSource, TileTitleSource, BASE_MAX_SITES, MAX_NUM_TILES,
};
use mosaic_logging::{mosaic_debug, mosaic_trace};

/// Handle returned by [`TileAggregator::add_observer`]; teardown is
/// explicit via `remove_observer`.
pub type ObserverId = u64;

/// The section map delivered to observers on every tile change.
pub type TileSections = BTreeMap<SectionType, Vec<Tile>>;

/// The locally-ranked browsing-history collaborator. The query callback
/// may fire synchronously or later; the aggregator keeps at most one
/// query outstanding.
pub trait MostVisitedSource {
    /// Forces the ranking to resync with the history backend.
    fn sync_with_history(&self);
    fn query_most_visited(&self, callback: Box<dyn FnOnce(Vec<MostVisitedUrl>)>);
}

/// Supervised-user filtering collaborator.
pub trait AllowlistFilter {
    fn is_blocked(&self, url: &Url) -> bool;
    fn is_child_profile(&self) -> bool;
}

/// Homepage collaborator. The title is resolved asynchronously; tiles
/// are emitted with an empty title until it arrives.
pub trait HomepageClient {
    fn is_homepage_tile_enabled(&self) -> bool;
    fn homepage_url(&self) -> Option<Url>;
    fn query_homepage_title(&self, callback: Box<dyn FnOnce(Option<String>)>);
}

/// Explore-sites collaborator; its presence alone produces the tile.
pub trait ExploreClient {
    fn explore_url(&self) -> Url;
    fn explore_title(&self) -> String;
}

/// Source of the current popular-sites catalog.
pub trait PopularSitesProvider {
    fn personalized_sites(&self) -> Vec<PopularSite>;
}

/// Fire-and-forget icon prefetch seam, fed for every accepted popular
/// tile.
pub trait IconPrefetcher {
    fn prefetch(&self, site: &PopularSite);
}

/// Registered tile consumer.
pub trait TileObserver {
    fn on_tiles_changed(&self, sections: &TileSections);
}

struct Inner {
    prefs: SharedPrefs,
    custom_links: Option<CustomLinksManager>,
    custom_links_enabled: bool,
    custom_links_action_count: u32,
    mv_source: Option<Rc<dyn MostVisitedSource>>,
    allowlist: Option<Rc<dyn AllowlistFilter>>,
    popular_sites: Option<Rc<dyn PopularSitesProvider>>,
    homepage_client: Option<Rc<dyn HomepageClient>>,
    explore_client: Option<Rc<dyn ExploreClient>>,
    icon_prefetcher: Option<Rc<dyn IconPrefetcher>>,
    observers: Vec<(ObserverId, Rc<dyn TileObserver>)>,
    next_observer_id: ObserverId,
    requested_max_sites: usize,
    mv_query_pending: bool,
    homepage_title: Option<String>,
    current_sections: Option<TileSections>,
}

impl Inner {
    fn custom_links_active(&self) -> bool {
        self.custom_links_enabled
            && self
                .custom_links
                .as_ref()
                .is_some_and(CustomLinksManager::is_initialized)
    }

    fn effective_max_sites(&self) -> usize {
        let bonus = usize::from(self.custom_links_enabled && self.custom_links.is_some());
        self.requested_max_sites.min(BASE_MAX_SITES + bonus)
    }

    fn is_blocked(&self, url: &Url) -> bool {
        self.allowlist
            .as_ref()
            .is_some_and(|filter| filter.is_blocked(url))
    }

    fn custom_link_tiles(&self) -> Vec<Tile> {
        let Some(manager) = &self.custom_links else {
            return Vec::new();
        };
        manager
            .links()
            .iter()
            .filter(|link| !self.is_blocked(&link.url))
            .take(MAX_NUM_TILES)
            .map(|link| Tile {
                url: link.url.clone(),
                title: link.title.clone(),
                title_source: TileTitleSource::Unknown,
                source: TileSource::CustomLinks,
                from_most_visited: link.is_most_visited,
            })
            .collect()
    }

    fn personal_tiles_from(&self, entries: Vec<MostVisitedUrl>) -> Vec<Tile> {
        let max = self.effective_max_sites();
        entries
            .into_iter()
            .filter(|entry| !self.is_blocked(&entry.url))
            .take(max)
            .map(|entry| Tile {
                title: generate_short_title(&entry.title),
                url: entry.url,
                title_source: TileTitleSource::Unknown,
                source: TileSource::TopSites,
                from_most_visited: true,
            })
            .collect()
    }
}

/// Merges the candidate lists (custom links, local history ranking,
/// popular sites, homepage, explore) into one deduplicated,
/// capacity-bounded tile list and fans it out to observers.
///
/// Single-threaded by construction: every asynchronous step resumes on
/// the same logical thread via callback, so no locking is involved.
pub struct TileAggregator {
    inner: Rc<RefCell<Inner>>,
}

impl TileAggregator {
    /// An aggregator without the custom-links feature; capacity stays
    /// at the base maximum.
    pub fn new(prefs: SharedPrefs) -> Self {
        Self::build(prefs, None)
    }

    /// An aggregator with custom-links editing, restored from the same
    /// preference store.
    pub fn with_custom_links(prefs: SharedPrefs) -> Self {
        let manager = CustomLinksManager::new(prefs.clone());
        Self::build(prefs, Some(manager))
    }

    fn build(prefs: SharedPrefs, custom_links: Option<CustomLinksManager>) -> Self {
        let has_custom_links = custom_links.is_some();
        Self {
            inner: Rc::new(RefCell::new(Inner {
                prefs,
                custom_links,
                custom_links_enabled: has_custom_links,
                custom_links_action_count: 0,
                mv_source: None,
                allowlist: None,
                popular_sites: None,
                homepage_client: None,
                explore_client: None,
                icon_prefetcher: None,
                observers: Vec::new(),
                next_observer_id: 1,
                requested_max_sites: BASE_MAX_SITES,
                mv_query_pending: false,
                homepage_title: None,
                current_sections: None,
            })),
        }
    }

    pub fn set_most_visited_source(&self, source: Rc<dyn MostVisitedSource>) {
        self.inner.borrow_mut().mv_source = Some(source);
    }

    pub fn set_allowlist_filter(&self, filter: Rc<dyn AllowlistFilter>) {
        self.inner.borrow_mut().allowlist = Some(filter);
    }

    pub fn set_popular_sites(&self, provider: Rc<dyn PopularSitesProvider>) {
        self.inner.borrow_mut().popular_sites = Some(provider);
    }

    pub fn set_homepage_client(&self, client: Rc<dyn HomepageClient>) {
        self.inner.borrow_mut().homepage_client = Some(client);
    }

    pub fn set_explore_client(&self, client: Rc<dyn ExploreClient>) {
        self.inner.borrow_mut().explore_client = Some(client);
    }

    pub fn set_icon_prefetcher(&self, prefetcher: Rc<dyn IconPrefetcher>) {
        self.inner.borrow_mut().icon_prefetcher = Some(prefetcher);
    }

    /// Registers an observer requesting up to `max_sites` tiles and
    /// triggers a build. The observer is replayed the current tiles
    /// immediately when a build has already happened.
    pub fn add_observer(&self, observer: Rc<dyn TileObserver>, max_sites: usize) -> ObserverId {
        let (id, replay) = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_observer_id;
            inner.next_observer_id += 1;
            inner.observers.push((id, observer.clone()));
            inner.requested_max_sites = max_sites;
            (id, inner.current_sections.clone())
        };
        if let Some(sections) = replay {
            observer.on_tiles_changed(&sections);
        }
        build_current_tiles(&self.inner);
        id
    }

    pub fn remove_observer(&self, id: ObserverId) {
        self.inner
            .borrow_mut()
            .observers
            .retain(|(observer_id, _)| *observer_id != id);
    }

    /// Forces the local-history source to resync, then rebuilds.
    pub fn refresh(&self) {
        let source = self.inner.borrow().mv_source.clone();
        if let Some(source) = &source {
            source.sync_with_history();
        }
        build_current_tiles(&self.inner);
    }

    pub fn set_custom_links_enabled(&self, enabled: bool) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.custom_links_enabled == enabled {
                return;
            }
            inner.custom_links_enabled = enabled;
        }
        build_current_tiles(&self.inner);
    }

    /// Seeds the custom-links list from the current personal tiles.
    pub fn initialize_custom_links(&self) -> bool {
        let initialized = {
            let mut inner = self.inner.borrow_mut();
            if !inner.custom_links_enabled {
                return false;
            }
            let seed = inner
                .current_sections
                .as_ref()
                .and_then(|sections| sections.get(&SectionType::Personalized))
                .cloned()
                .unwrap_or_default();
            match inner.custom_links.as_mut() {
                Some(manager) => {
                    let initialized = manager.initialize(&seed);
                    if initialized {
                        inner.custom_links_action_count = 0;
                    }
                    initialized
                }
                None => false,
            }
        };
        if initialized {
            build_current_tiles(&self.inner);
        }
        initialized
    }

    pub fn uninitialize_custom_links(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.custom_links_action_count = 0;
            if let Some(manager) = inner.custom_links.as_mut() {
                manager.uninitialize();
            }
        }
        build_current_tiles(&self.inner);
    }

    pub fn add_custom_link(&self, url: &str, title: &str) -> bool {
        let title = title.to_string();
        let url = url.to_string();
        self.custom_link_action(move |manager| manager.add_link(&url, &title))
    }

    pub fn update_custom_link(
        &self,
        url: &str,
        new_url: Option<&str>,
        new_title: Option<&str>,
    ) -> bool {
        let url = url.to_string();
        let new_url = new_url.map(str::to_string);
        let new_title = new_title.map(str::to_string);
        self.custom_link_action(move |manager| {
            manager.update_link(&url, new_url.as_deref(), new_title.as_deref())
        })
    }

    pub fn reorder_custom_link(&self, url: &str, new_pos: usize) -> bool {
        let url = url.to_string();
        self.custom_link_action(move |manager| manager.reorder_link(&url, new_pos))
    }

    pub fn delete_custom_link(&self, url: &str) -> bool {
        let url = url.to_string();
        self.custom_link_action(move |manager| manager.delete_link(&url))
    }

    /// Reverts the latest custom-link action. Undoing the only action
    /// performed since initialization uninitializes custom links
    /// entirely, dropping back to the merged history tiles; later
    /// undos restore the manager's single snapshot. Unlike the
    /// mutators above, undo never initializes the manager lazily.
    pub fn undo_custom_link_action(&self) -> bool {
        let undone = {
            let mut inner = self.inner.borrow_mut();
            if !inner.custom_links_enabled || inner.custom_links.is_none() {
                return false;
            }
            if inner.custom_links_action_count == 1 {
                inner.custom_links_action_count = 0;
                if let Some(manager) = inner.custom_links.as_mut() {
                    manager.uninitialize();
                }
                true
            } else {
                let undone = inner
                    .custom_links
                    .as_mut()
                    .map(|manager| manager.undo())
                    .unwrap_or(false);
                if undone {
                    inner.custom_links_action_count =
                        inner.custom_links_action_count.saturating_sub(1);
                }
                undone
            }
        };
        if undone {
            build_current_tiles(&self.inner);
        }
        undone
    }

    /// Forwards a history-deletion batch to the custom-links manager
    /// and rebuilds.
    pub fn on_history_deletion(&self, deletion: &HistoryDeletion) {
        {
            let mut inner = self.inner.borrow_mut();
            if let Some(manager) = inner.custom_links.as_mut() {
                manager.on_history_deletion(deletion);
            }
        }
        build_current_tiles(&self.inner);
    }

    /// Forwards a persisted-record change event. Remote-origin changes
    /// reload the manager and rebuild; local echoes are dropped.
    pub fn on_custom_links_store_changed(&self, origin: ChangeOrigin) {
        {
            let mut inner = self.inner.borrow_mut();
            if let Some(manager) = inner.custom_links.as_mut() {
                manager.on_store_changed(origin);
            }
        }
        if origin == ChangeOrigin::Remote {
            build_current_tiles(&self.inner);
        }
    }

    /// Called by the embedder when a popular-sites fetch completed.
    pub fn on_popular_sites_downloaded(&self) {
        build_current_tiles(&self.inner);
    }

    /// Whether the last save left spare capacity that popular sites
    /// could fill; embedders use this to kick a catalog fetch.
    pub fn needs_popular_sites(&self) -> bool {
        let inner = self.inner.borrow();
        let personal = inner
            .prefs
            .borrow()
            .get(keys::NUM_PERSONAL_SUGGESTIONS)
            .and_then(|value| value.as_u64())
            .unwrap_or(0) as usize;
        personal < inner.effective_max_sites()
    }

    pub fn current_sections(&self) -> Option<TileSections> {
        self.inner.borrow().current_sections.clone()
    }

    /// Runs one custom-link mutation, initializing the manager from the
    /// current personal tiles first when needed. A failed *first*
    /// action since that initialization rolls the initialization back,
    /// so editing state does not persist after a no-op first action.
    fn custom_link_action(
        &self,
        action: impl FnOnce(&mut CustomLinksManager) -> bool,
    ) -> bool {
        let success = {
            let mut inner = self.inner.borrow_mut();
            if !inner.custom_links_enabled || inner.custom_links.is_none() {
                return false;
            }
            if !inner.custom_links.as_ref().map(CustomLinksManager::is_initialized).unwrap_or(false)
            {
                let seed = inner
                    .current_sections
                    .as_ref()
                    .and_then(|sections| sections.get(&SectionType::Personalized))
                    .cloned()
                    .unwrap_or_default();
                if let Some(manager) = inner.custom_links.as_mut() {
                    manager.initialize(&seed);
                }
                inner.custom_links_action_count = 0;
            }
            let manager = inner
                .custom_links
                .as_mut()
                .expect("custom links checked above");
            let success = action(manager);
            if success {
                inner.custom_links_action_count += 1;
            } else if inner.custom_links_action_count == 0 {
                mosaic_debug!("First custom-link action failed; rolling back initialization");
                if let Some(manager) = inner.custom_links.as_mut() {
                    manager.uninitialize();
                }
            }
            success
        };
        if success {
            build_current_tiles(&self.inner);
        }
        success
    }
}

enum BuildPath {
    CustomLinks(Vec<Tile>),
    Query(Rc<dyn MostVisitedSource>),
    NoSource,
}

/// One aggregation pass: custom links short-circuit everything else;
/// otherwise the local-history ranking is queried (at most one query
/// outstanding) and merged with the remaining sources.
fn build_current_tiles(this: &Rc<RefCell<Inner>>) {
    let path = {
        let mut inner = this.borrow_mut();
        if inner.custom_links_active() {
            BuildPath::CustomLinks(inner.custom_link_tiles())
        } else {
            match inner.mv_source.clone() {
                Some(source) => {
                    if inner.mv_query_pending {
                        return;
                    }
                    inner.mv_query_pending = true;
                    BuildPath::Query(source)
                }
                // An unconfigured source contributes zero tiles; this
                // is not an error.
                None => BuildPath::NoSource,
            }
        }
    };
    match path {
        BuildPath::CustomLinks(tiles) => save_and_notify(this, tiles),
        BuildPath::Query(source) => {
            let weak = Rc::downgrade(this);
            source.query_most_visited(Box::new(move |urls| {
                if let Some(this) = weak.upgrade() {
                    on_most_visited_urls(&this, urls);
                }
            }));
        }
        BuildPath::NoSource => on_most_visited_urls(this, Vec::new()),
    }
}

fn on_most_visited_urls(this: &Rc<RefCell<Inner>>, urls: Vec<MostVisitedUrl>) {
    let personal = {
        let mut inner = this.borrow_mut();
        inner.mv_query_pending = false;
        // Custom links became initialized while the query was in
        // flight: the result is stale, drop it.
        if inner.custom_links_active() {
            mosaic_trace!("Discarding stale history ranking result");
            return;
        }
        inner.personal_tiles_from(urls)
    };
    merge_most_visited_tiles(this, personal);
}

fn merge_most_visited_tiles(this: &Rc<RefCell<Inner>>, mut personal: Vec<Tile>) {
    let (tiles, prefetch_sites, prefetcher, homepage_query) = {
        let inner = this.borrow();
        let max = inner.effective_max_sites();

        let explore_tile = inner.explore_client.as_ref().map(|client| {
            Tile::new(client.explore_url(), client.explore_title(), TileSource::Explore)
        });
        let explore_slots = usize::from(explore_tile.is_some());
        // The explore tile displaces the last personal tile rather
        // than exceeding capacity.
        personal.truncate(max.saturating_sub(explore_slots));

        let mut used_hosts: HashSet<String> = personal
            .iter()
            .chain(explore_tile.iter())
            .filter_map(|tile| tile.url.host_str().map(str::to_string))
            .collect();

        let mut popular_tiles: Vec<Tile> = Vec::new();
        let mut prefetch_sites: Vec<PopularSite> = Vec::new();
        let child_profile = inner
            .allowlist
            .as_ref()
            .is_some_and(|filter| filter.is_child_profile());
        if !child_profile {
            if let Some(provider) = &inner.popular_sites {
                for site in provider.personalized_sites() {
                    if personal.len() + popular_tiles.len() + explore_slots >= max {
                        break;
                    }
                    if inner.is_blocked(&site.url) {
                        continue;
                    }
                    let Some(host) = site.url.host_str() else {
                        continue;
                    };
                    // Personal tiles always win host ties; a colliding
                    // popular site is excluded, never substituted.
                    if is_host_or_mobile_page_known(&used_hosts, host) {
                        continue;
                    }
                    used_hosts.insert(host.to_string());
                    popular_tiles.push(Tile {
                        url: site.url.clone(),
                        title: site.title.clone(),
                        title_source: site.title_source,
                        source: if site.baked_in {
                            TileSource::PopularBakedIn
                        } else {
                            TileSource::Popular
                        },
                        from_most_visited: false,
                    });
                    prefetch_sites.push(site);
                }
            }
        }

        let mut tiles = personal;
        tiles.extend(popular_tiles);
        tiles.extend(explore_tile);

        let homepage_query = insert_home_tile(&inner, &mut tiles, max);

        (tiles, prefetch_sites, inner.icon_prefetcher.clone(), homepage_query)
    };

    if let Some(prefetcher) = &prefetcher {
        for site in &prefetch_sites {
            prefetcher.prefetch(site);
        }
    }

    save_and_notify(this, tiles);

    if let Some(client) = homepage_query {
        let weak = Rc::downgrade(this);
        client.query_homepage_title(Box::new(move |title| {
            let Some(this) = weak.upgrade() else {
                return;
            };
            let changed = {
                let mut inner = this.borrow_mut();
                if inner.homepage_title == title {
                    false
                } else {
                    inner.homepage_title = title;
                    true
                }
            };
            if changed {
                build_current_tiles(&this);
            }
        }));
    }
}

/// Pins the homepage at index 0 when enabled and not blocked: an
/// existing tile on the homepage's host is relabeled and moved,
/// otherwise a fresh tile is inserted, evicting the last tile at
/// capacity. Returns the client when its title should be (re)queried.
fn insert_home_tile(
    inner: &Inner,
    tiles: &mut Vec<Tile>,
    max: usize,
) -> Option<Rc<dyn HomepageClient>> {
    let client = inner.homepage_client.as_ref()?;
    if !client.is_homepage_tile_enabled() || max == 0 {
        return None;
    }
    let homepage_url = client.homepage_url()?;
    if inner.is_blocked(&homepage_url) {
        return None;
    }
    let homepage_host = homepage_url.host_str().map(str::to_string);
    let existing = tiles
        .iter()
        .position(|tile| tile.url.host_str().map(str::to_string) == homepage_host);
    match existing {
        Some(position) => {
            let mut tile = tiles.remove(position);
            tile.source = TileSource::Homepage;
            tiles.insert(0, tile);
        }
        None => {
            if tiles.len() >= max {
                tiles.pop();
            }
            tiles.insert(
                0,
                Tile::new(
                    homepage_url,
                    inner.homepage_title.clone().unwrap_or_default(),
                    TileSource::Homepage,
                ),
            );
        }
    }
    Some(client.clone())
}

/// Persists the result and fans it out — unless it is identical in
/// content to the previously saved tile list, in which case both the
/// write and the notification are skipped.
fn save_and_notify(this: &Rc<RefCell<Inner>>, tiles: Vec<Tile>) {
    let mut sections: TileSections = BTreeMap::new();
    sections.insert(SectionType::Personalized, tiles);

    let observers = {
        let mut inner = this.borrow_mut();
        if inner.current_sections.as_ref() == Some(&sections) {
            return;
        }
        let personal_count = sections
            .get(&SectionType::Personalized)
            .map(|tiles| {
                tiles
                    .iter()
                    .filter(|tile| {
                        !matches!(tile.source, TileSource::Popular | TileSource::PopularBakedIn)
                    })
                    .count()
            })
            .unwrap_or(0);
        inner
            .prefs
            .borrow_mut()
            .set(keys::NUM_PERSONAL_SUGGESTIONS, Value::from(personal_count));
        inner.current_sections = Some(sections.clone());
        inner
            .observers
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect::<Vec<_>>()
    };
    for observer in observers {
        observer.on_tiles_changed(&sections);
    }
}
