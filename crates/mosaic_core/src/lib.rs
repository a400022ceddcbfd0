//! Mosaic core: tile data model, custom-link state machine, and the
//! pure merge helpers shared with the engine.
mod custom_links;
mod dedupe;
mod link_store;
mod prefs;
mod short_title;
mod types;

pub use custom_links::{ChangeOrigin, CustomLinksManager, HistoryDeletion, ListenerId};
pub use dedupe::is_host_or_mobile_page_known;
pub use link_store::LinkStore;
pub use prefs::{keys, MemoryPrefStore, PrefStore, SharedPrefs};
pub use short_title::generate_short_title;
pub use types::{
    Link, MostVisitedUrl, PopularSite, SectionType, Tile, TileSource, TileTitleSource,
    BASE_MAX_SITES, MAX_NUM_LINKS, MAX_NUM_TILES,
};
