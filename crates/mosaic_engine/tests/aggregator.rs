use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use url::Url;

use mosaic_core::{
    keys, ChangeOrigin, HistoryDeletion, MemoryPrefStore, MostVisitedUrl, PopularSite, PrefStore,
    SectionType, SharedPrefs, TileSource, TileTitleSource,
};
use mosaic_engine::{
    AllowlistFilter, ExploreClient, HomepageClient, IconFetchQueue, MostVisitedSource,
    PopularSitesProvider, TileAggregator, TileObserver, TileSections,
};

#[derive(Default)]
struct FakeMostVisited {
    urls: RefCell<Vec<MostVisitedUrl>>,
    deferred: Cell<bool>,
    pending: RefCell<Vec<Box<dyn FnOnce(Vec<MostVisitedUrl>)>>>,
    sync_calls: Cell<usize>,
}

impl FakeMostVisited {
    fn with_urls(entries: &[(&str, &str)]) -> Rc<Self> {
        let source = Rc::new(Self::default());
        source.set_urls(entries);
        source
    }

    fn set_urls(&self, entries: &[(&str, &str)]) {
        *self.urls.borrow_mut() = entries
            .iter()
            .map(|(url, title)| MostVisitedUrl {
                url: Url::parse(url).unwrap(),
                title: title.to_string(),
            })
            .collect();
    }

    fn flush(&self) {
        let urls = self.urls.borrow().clone();
        for callback in self.pending.borrow_mut().drain(..) {
            callback(urls.clone());
        }
    }
}

impl MostVisitedSource for FakeMostVisited {
    fn sync_with_history(&self) {
        self.sync_calls.set(self.sync_calls.get() + 1);
    }

    fn query_most_visited(&self, callback: Box<dyn FnOnce(Vec<MostVisitedUrl>)>) {
        if self.deferred.get() {
            self.pending.borrow_mut().push(callback);
        } else {
            callback(self.urls.borrow().clone());
        }
    }
}

#[derive(Default)]
struct FakeAllowlist {
    blocked: RefCell<HashSet<String>>,
    child: Cell<bool>,
}

impl FakeAllowlist {
    fn blocking(urls: &[&str]) -> Rc<Self> {
        let filter = Rc::new(Self::default());
        *filter.blocked.borrow_mut() = urls.iter().map(|url| url.to_string()).collect();
        filter
    }
}

impl AllowlistFilter for FakeAllowlist {
    fn is_blocked(&self, url: &Url) -> bool {
        self.blocked.borrow().contains(url.as_str())
    }

    fn is_child_profile(&self) -> bool {
        self.child.get()
    }
}

#[derive(Default)]
struct FakePopularSites {
    sites: RefCell<Vec<PopularSite>>,
}

impl FakePopularSites {
    fn with_sites(entries: &[(&str, &str)]) -> Rc<Self> {
        let provider = Rc::new(Self::default());
        *provider.sites.borrow_mut() = entries
            .iter()
            .map(|(url, title)| popular_site(url, title))
            .collect();
        provider
    }
}

impl PopularSitesProvider for FakePopularSites {
    fn personalized_sites(&self) -> Vec<PopularSite> {
        self.sites.borrow().clone()
    }
}

struct FakeHomepage {
    enabled: Cell<bool>,
    url: RefCell<Option<Url>>,
    title: RefCell<Option<String>>,
}

impl FakeHomepage {
    fn new(url: &str, title: &str) -> Rc<Self> {
        Rc::new(Self {
            enabled: Cell::new(true),
            url: RefCell::new(Some(Url::parse(url).unwrap())),
            title: RefCell::new(Some(title.to_string())),
        })
    }
}

impl HomepageClient for FakeHomepage {
    fn is_homepage_tile_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn homepage_url(&self) -> Option<Url> {
        self.url.borrow().clone()
    }

    fn query_homepage_title(&self, callback: Box<dyn FnOnce(Option<String>)>) {
        callback(self.title.borrow().clone());
    }
}

struct FakeExplore;

impl ExploreClient for FakeExplore {
    fn explore_url(&self) -> Url {
        Url::parse("https://explore.example.com/").unwrap()
    }

    fn explore_title(&self) -> String {
        "Explore".to_string()
    }
}

#[derive(Default)]
struct RecordingObserver {
    snapshots: RefCell<Vec<TileSections>>,
}

impl RecordingObserver {
    fn count(&self) -> usize {
        self.snapshots.borrow().len()
    }

    fn last_tiles(&self) -> Vec<(String, TileSource)> {
        let snapshots = self.snapshots.borrow();
        let sections = snapshots.last().expect("observer was notified");
        sections
            .get(&SectionType::Personalized)
            .map(|tiles| {
                tiles
                    .iter()
                    .map(|tile| (tile.url.to_string(), tile.source))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn last_titles(&self) -> Vec<String> {
        let snapshots = self.snapshots.borrow();
        let sections = snapshots.last().expect("observer was notified");
        sections[&SectionType::Personalized]
            .iter()
            .map(|tile| tile.title.clone())
            .collect()
    }
}

impl TileObserver for RecordingObserver {
    fn on_tiles_changed(&self, sections: &TileSections) {
        self.snapshots.borrow_mut().push(sections.clone());
    }
}

fn popular_site(url: &str, title: &str) -> PopularSite {
    PopularSite {
        title: title.to_string(),
        url: Url::parse(url).unwrap(),
        favicon_url: None,
        large_icon_url: Some(Url::parse(&format!("{url}icon.png")).unwrap()),
        title_source: TileTitleSource::TitleTag,
        baked_in: false,
        default_icon_resource: -1,
    }
}

fn personal_count(prefs: &SharedPrefs) -> u64 {
    prefs
        .borrow()
        .get(keys::NUM_PERSONAL_SUGGESTIONS)
        .and_then(|value| value.as_u64())
        .unwrap_or(0)
}

#[test]
fn most_visited_tiles_flow_to_observers() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs.clone());
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[
        ("https://a.com/", "Site A"),
        ("https://b.com/", "Site B - The Best B"),
    ]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    assert_eq!(
        observer.last_tiles(),
        vec![
            ("https://a.com/".to_string(), TileSource::TopSites),
            ("https://b.com/".to_string(), TileSource::TopSites),
        ]
    );
    assert_eq!(personal_count(&prefs), 2);
}

#[test]
fn long_titles_are_shortened_to_their_site_name() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[(
        "https://maps.example.com/",
        "Directions from here to there - Example Maps",
    )]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    assert_eq!(observer.last_titles(), vec!["Example Maps".to_string()]);
}

#[test]
fn blocked_urls_never_become_tiles() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[
        ("https://a.com/", "A"),
        ("https://blocked.com/", "Blocked"),
    ]));
    aggregator.set_allowlist_filter(FakeAllowlist::blocking(&["https://blocked.com/"]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    assert_eq!(
        observer.last_tiles(),
        vec![("https://a.com/".to_string(), TileSource::TopSites)]
    );
}

#[test]
fn popular_sites_fill_the_remaining_slots() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs.clone());
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));
    aggregator.set_popular_sites(FakePopularSites::with_sites(&[
        ("https://popular.com/", "Popular"),
        ("https://other.com/", "Other"),
    ]));
    let queue = Rc::new(IconFetchQueue::new());
    aggregator.set_icon_prefetcher(queue.clone());

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    assert_eq!(
        observer.last_tiles(),
        vec![
            ("https://a.com/".to_string(), TileSource::TopSites),
            ("https://popular.com/".to_string(), TileSource::Popular),
            ("https://other.com/".to_string(), TileSource::Popular),
        ]
    );
    // Popular tiles do not count as personal suggestions.
    assert_eq!(personal_count(&prefs), 1);
    // Each accepted popular tile queued an icon prefetch.
    assert_eq!(queue.drain().len(), 2);
}

#[test]
fn baked_in_popular_sites_keep_their_source() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(Rc::new(FakeMostVisited::default()));
    let provider = Rc::new(FakePopularSites::default());
    provider.sites.borrow_mut().push(PopularSite {
        baked_in: true,
        ..popular_site("https://baked.com/", "Baked")
    });
    aggregator.set_popular_sites(provider);

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    assert_eq!(
        observer.last_tiles(),
        vec![("https://baked.com/".to_string(), TileSource::PopularBakedIn)]
    );
}

#[test]
fn popular_sites_dedupe_against_mobile_hosts() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[(
        "https://m.wikipedia.org/",
        "Wikipedia mobile",
    )]));
    aggregator.set_popular_sites(FakePopularSites::with_sites(&[
        ("https://www.wikipedia.org/", "Wikipedia"),
        ("https://other.com/", "Other"),
    ]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    assert_eq!(
        observer.last_tiles(),
        vec![
            ("https://m.wikipedia.org/".to_string(), TileSource::TopSites),
            ("https://other.com/".to_string(), TileSource::Popular),
        ]
    );
}

#[test]
fn requested_max_sites_caps_the_merge() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[
        ("https://a.com/", "A"),
        ("https://b.com/", "B"),
        ("https://c.com/", "C"),
    ]));
    aggregator.set_popular_sites(FakePopularSites::with_sites(&[(
        "https://popular.com/",
        "Popular",
    )]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 3);

    assert_eq!(
        observer.last_tiles(),
        vec![
            ("https://a.com/".to_string(), TileSource::TopSites),
            ("https://b.com/".to_string(), TileSource::TopSites),
            ("https://c.com/".to_string(), TileSource::TopSites),
        ]
    );
}

#[test]
fn child_profiles_get_no_popular_tiles() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));
    aggregator.set_popular_sites(FakePopularSites::with_sites(&[(
        "https://popular.com/",
        "Popular",
    )]));
    let filter = Rc::new(FakeAllowlist::default());
    filter.child.set(true);
    aggregator.set_allowlist_filter(filter);

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    assert_eq!(
        observer.last_tiles(),
        vec![("https://a.com/".to_string(), TileSource::TopSites)]
    );
}

#[test]
fn explore_tile_takes_the_last_slot() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[
        ("https://a.com/", "A"),
        ("https://b.com/", "B"),
    ]));
    aggregator.set_explore_client(Rc::new(FakeExplore));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 2);

    assert_eq!(
        observer.last_tiles(),
        vec![
            ("https://a.com/".to_string(), TileSource::TopSites),
            ("https://explore.example.com/".to_string(), TileSource::Explore),
        ]
    );
}

#[test]
fn homepage_tile_is_pinned_first_with_its_title() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));
    aggregator.set_homepage_client(FakeHomepage::new("https://home.com/", "Home"));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    assert_eq!(
        observer.last_tiles(),
        vec![
            ("https://home.com/".to_string(), TileSource::Homepage),
            ("https://a.com/".to_string(), TileSource::TopSites),
        ]
    );
    assert_eq!(observer.last_titles()[0], "Home");
}

#[test]
fn homepage_relabels_an_existing_tile_on_the_same_host() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[
        ("https://a.com/", "A"),
        ("https://home.com/deep/page", "Deep page"),
    ]));
    aggregator.set_homepage_client(FakeHomepage::new("https://home.com/", "Home"));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    assert_eq!(
        observer.last_tiles(),
        vec![
            ("https://home.com/deep/page".to_string(), TileSource::Homepage),
            ("https://a.com/".to_string(), TileSource::TopSites),
        ]
    );
    // The relabeled tile keeps its own title.
    assert_eq!(observer.last_titles()[0], "Deep page");
}

#[test]
fn homepage_evicts_the_last_tile_at_capacity() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[
        ("https://a.com/", "A"),
        ("https://b.com/", "B"),
    ]));
    aggregator.set_homepage_client(FakeHomepage::new("https://home.com/", "Home"));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 2);

    assert_eq!(
        observer.last_tiles(),
        vec![
            ("https://home.com/".to_string(), TileSource::Homepage),
            ("https://a.com/".to_string(), TileSource::TopSites),
        ]
    );
}

#[test]
fn blocked_homepage_is_left_out() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));
    aggregator.set_homepage_client(FakeHomepage::new("https://home.com/", "Home"));
    aggregator.set_allowlist_filter(FakeAllowlist::blocking(&["https://home.com/"]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    assert_eq!(
        observer.last_tiles(),
        vec![("https://a.com/".to_string(), TileSource::TopSites)]
    );
}

#[test]
fn identical_rebuild_is_not_renotified() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);
    assert_eq!(observer.count(), 1);

    aggregator.on_popular_sites_downloaded();
    assert_eq!(observer.count(), 1);
}

#[test]
fn later_observers_are_replayed_the_current_tiles() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));

    let first = Rc::new(RecordingObserver::default());
    aggregator.add_observer(first.clone(), 8);

    let second = Rc::new(RecordingObserver::default());
    aggregator.add_observer(second.clone(), 8);
    assert_eq!(
        second.last_tiles(),
        vec![("https://a.com/".to_string(), TileSource::TopSites)]
    );
}

#[test]
fn removed_observers_stop_receiving_tiles() {
    let prefs = MemoryPrefStore::shared();
    let source = FakeMostVisited::with_urls(&[("https://a.com/", "A")]);
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(source.clone());

    let observer = Rc::new(RecordingObserver::default());
    let id = aggregator.add_observer(observer.clone(), 8);
    assert_eq!(observer.count(), 1);

    aggregator.remove_observer(id);
    source.set_urls(&[("https://b.com/", "B")]);
    aggregator.refresh();
    assert_eq!(observer.count(), 1);
}

#[test]
fn refresh_resyncs_the_history_source() {
    let prefs = MemoryPrefStore::shared();
    let source = FakeMostVisited::with_urls(&[("https://a.com/", "A")]);
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(source.clone());

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    source.set_urls(&[("https://b.com/", "B")]);
    aggregator.refresh();
    assert_eq!(source.sync_calls.get(), 1);
    assert_eq!(
        observer.last_tiles(),
        vec![("https://b.com/".to_string(), TileSource::TopSites)]
    );
}

#[test]
fn unconfigured_source_produces_an_empty_tile_list() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);
    assert_eq!(observer.count(), 1);
    assert!(observer.last_tiles().is_empty());
}

#[test]
fn initialized_custom_links_replace_the_merged_tiles() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::with_custom_links(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));
    aggregator.set_popular_sites(FakePopularSites::with_sites(&[(
        "https://popular.com/",
        "Popular",
    )]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    // Initialization seeds from everything currently shown, popular
    // tiles included.
    assert!(aggregator.initialize_custom_links());
    assert_eq!(
        observer.last_tiles(),
        vec![
            ("https://a.com/".to_string(), TileSource::CustomLinks),
            ("https://popular.com/".to_string(), TileSource::CustomLinks),
        ]
    );
}

#[test]
fn custom_link_mutations_initialize_lazily() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::with_custom_links(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    assert!(aggregator.add_custom_link("https://new.com/", "New"));
    assert_eq!(
        observer.last_tiles(),
        vec![
            ("https://a.com/".to_string(), TileSource::CustomLinks),
            ("https://new.com/".to_string(), TileSource::CustomLinks),
        ]
    );
}

#[test]
fn failed_first_custom_action_rolls_initialization_back() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::with_custom_links(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    assert!(!aggregator.add_custom_link("not a url", "Bad"));
    // The implicit initialization was rolled back; tiles still come
    // from the history ranking.
    assert_eq!(
        observer.last_tiles(),
        vec![("https://a.com/".to_string(), TileSource::TopSites)]
    );
    assert!(aggregator.add_custom_link("https://new.com/", "New"));
    assert_eq!(observer.last_tiles().len(), 2);
}

#[test]
fn failed_later_custom_action_keeps_the_list() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::with_custom_links(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    assert!(aggregator.add_custom_link("https://new.com/", "New"));
    assert!(!aggregator.add_custom_link("https://new.com/", "Duplicate"));
    assert_eq!(observer.last_tiles().len(), 2);
}

#[test]
fn undo_after_a_single_action_uninitializes() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::with_custom_links(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    // Nothing to undo yet, and no lazy initialization either.
    assert!(!aggregator.undo_custom_link_action());

    assert!(aggregator.add_custom_link("https://new.com/", "New"));
    assert_eq!(observer.last_tiles()[0].1, TileSource::CustomLinks);

    // The only action since initialization: undoing it drops custom
    // links entirely, not just the added link.
    assert!(aggregator.undo_custom_link_action());
    assert_eq!(
        observer.last_tiles(),
        vec![("https://a.com/".to_string(), TileSource::TopSites)]
    );
    assert!(!aggregator.undo_custom_link_action());
}

#[test]
fn undo_after_multiple_actions_restores_the_snapshot() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::with_custom_links(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    assert!(aggregator.add_custom_link("https://new.com/", "New"));
    assert!(aggregator.add_custom_link("https://other.com/", "Other"));

    // Two actions deep: undo only reverts the latest one and custom
    // links stay initialized.
    assert!(aggregator.undo_custom_link_action());
    assert_eq!(
        observer.last_tiles(),
        vec![
            ("https://a.com/".to_string(), TileSource::CustomLinks),
            ("https://new.com/".to_string(), TileSource::CustomLinks),
        ]
    );

    // Now back at one action: the next undo uninitializes.
    assert!(aggregator.undo_custom_link_action());
    assert_eq!(
        observer.last_tiles(),
        vec![("https://a.com/".to_string(), TileSource::TopSites)]
    );
}

#[test]
fn disabling_custom_links_restores_the_merge() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::with_custom_links(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);
    assert!(aggregator.add_custom_link("https://new.com/", "New"));

    aggregator.set_custom_links_enabled(false);
    assert_eq!(
        observer.last_tiles(),
        vec![("https://a.com/".to_string(), TileSource::TopSites)]
    );

    aggregator.set_custom_links_enabled(true);
    assert_eq!(
        observer.last_tiles(),
        vec![
            ("https://a.com/".to_string(), TileSource::CustomLinks),
            ("https://new.com/".to_string(), TileSource::CustomLinks),
        ]
    );
}

#[test]
fn uninitializing_custom_links_restores_the_merge() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::with_custom_links(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);
    assert!(aggregator.add_custom_link("https://new.com/", "New"));

    aggregator.uninitialize_custom_links();
    assert_eq!(
        observer.last_tiles(),
        vec![("https://a.com/".to_string(), TileSource::TopSites)]
    );
}

#[test]
fn stale_history_results_are_discarded_after_initialization() {
    let prefs = MemoryPrefStore::shared();
    let source = FakeMostVisited::with_urls(&[("https://a.com/", "A")]);
    source.deferred.set(true);
    let aggregator = TileAggregator::with_custom_links(prefs);
    aggregator.set_most_visited_source(source.clone());

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);
    // The history query is still in flight.
    assert_eq!(observer.count(), 0);

    assert!(aggregator.add_custom_link("https://new.com/", "New"));
    let custom = observer.last_tiles();
    assert_eq!(custom[0].1, TileSource::CustomLinks);

    // The late result must not clobber the custom links.
    source.flush();
    assert_eq!(observer.last_tiles(), custom);
}

#[test]
fn history_deletion_prunes_most_visited_custom_links() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::with_custom_links(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);
    assert!(aggregator.add_custom_link("https://new.com/", "New"));

    aggregator.on_history_deletion(&HistoryDeletion {
        urls: vec![Url::parse("https://a.com/").unwrap()],
        ..HistoryDeletion::default()
    });
    // The seeded link goes, the user-added one stays.
    assert_eq!(
        observer.last_tiles(),
        vec![("https://new.com/".to_string(), TileSource::CustomLinks)]
    );
}

#[test]
fn remote_store_changes_reload_the_links() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::with_custom_links(prefs.clone());
    aggregator.set_most_visited_source(Rc::new(FakeMostVisited::default()));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer.clone(), 8);

    // Another device pushed a list into the shared record.
    {
        let mut stored = prefs.borrow_mut();
        stored.set(keys::CUSTOM_LINKS_INITIALIZED, Value::Bool(true));
        stored.set(
            keys::CUSTOM_LINKS_LIST,
            json!([
                {"url": "https://synced.com/", "title": "Synced", "is_most_visited": false},
            ]),
        );
    }

    aggregator.on_custom_links_store_changed(ChangeOrigin::Local);
    assert!(observer.last_tiles().is_empty());

    aggregator.on_custom_links_store_changed(ChangeOrigin::Remote);
    assert_eq!(
        observer.last_tiles(),
        vec![("https://synced.com/".to_string(), TileSource::CustomLinks)]
    );
}

#[test]
fn needs_popular_sites_tracks_spare_capacity() {
    let prefs = MemoryPrefStore::shared();
    let aggregator = TileAggregator::new(prefs);
    aggregator.set_most_visited_source(FakeMostVisited::with_urls(&[("https://a.com/", "A")]));

    let observer = Rc::new(RecordingObserver::default());
    aggregator.add_observer(observer, 8);
    assert!(aggregator.needs_popular_sites());
}
