//! Mosaic engine: tile aggregation, catalog fetching and icon caching.
mod aggregator;
mod catalog;
mod icon_cache;
mod popular_sites;

pub use aggregator::{
    AllowlistFilter, ExploreClient, HomepageClient, IconPrefetcher, MostVisitedSource, ObserverId,
    PopularSitesProvider, TileAggregator, TileObserver, TileSections,
};
pub use catalog::{parse_catalog, CatalogParseError};
pub use icon_cache::{
    DecodedIcon, HttpIconFetcher, IconCache, IconError, IconFetchQueue, IconFetcher, IconOutcome,
    IconRequest, IconStore, MemoryIconStore,
};
pub use popular_sites::{
    CatalogError, CatalogTransport, Clock, HttpCatalogTransport, NoVariations,
    PopularSitesFetcher, SystemClock, TransportError, VariationsSource,
};
