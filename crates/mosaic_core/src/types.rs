use url::Url;

/// Hard cap on the number of user-curated links.
pub const MAX_NUM_LINKS: usize = 10;

/// Hard cap on the number of tiles in any section.
pub const MAX_NUM_TILES: usize = 10;

/// Default number of sites an observer may request; one extra slot is
/// granted while the custom-links feature is active.
pub const BASE_MAX_SITES: usize = 8;

/// Where the title of a tile was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileTitleSource {
    #[default]
    Unknown,
    TitleTag,
    MetaTag,
    Manifest,
    Inferred,
}

impl TileTitleSource {
    /// Maps the integer used in the popular-sites wire format. Unknown
    /// integers fall back to `Unknown`.
    pub fn from_wire(value: i64) -> Self {
        match value {
            1 => TileTitleSource::TitleTag,
            2 => TileTitleSource::MetaTag,
            3 => TileTitleSource::Manifest,
            4 => TileTitleSource::Inferred,
            _ => TileTitleSource::Unknown,
        }
    }
}

/// Provenance of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileSource {
    /// Locally-ranked browsing history.
    TopSites,
    /// Server-supplied popular site.
    Popular,
    /// Popular site shipped with the build rather than downloaded.
    PopularBakedIn,
    /// Supervised-user allowlist entry.
    Allowlist,
    /// The user's homepage.
    Homepage,
    /// User-curated custom link.
    CustomLinks,
    /// The single optional explore entry.
    Explore,
}

/// Section of the tile map delivered to observers. Only `Personalized`
/// participates in merging; the remaining sections exist so catalog
/// payloads can be parsed without guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SectionType {
    Personalized,
    Social,
    Entertainment,
    News,
    Ecommerce,
    Tools,
    Travel,
}

impl SectionType {
    /// Maps the integer section id used in version >= 6 catalogs.
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            1 => Some(SectionType::Personalized),
            2 => Some(SectionType::Social),
            3 => Some(SectionType::Entertainment),
            4 => Some(SectionType::News),
            5 => Some(SectionType::Ecommerce),
            6 => Some(SectionType::Tools),
            7 => Some(SectionType::Travel),
            _ => None,
        }
    }
}

/// One shortcut entry shown to the user, tagged with its provenance.
/// Tiles are produced fresh on every aggregation pass and replaced
/// wholesale, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub url: Url,
    pub title: String,
    pub title_source: TileTitleSource,
    pub source: TileSource,
    pub from_most_visited: bool,
}

impl Tile {
    pub fn new(url: Url, title: impl Into<String>, source: TileSource) -> Self {
        Self {
            url,
            title: title.into(),
            title_source: TileTitleSource::Unknown,
            source,
            from_most_visited: false,
        }
    }
}

/// A user-curated tile entity, owned exclusively by the custom-links
/// manager. `is_most_visited` marks a link seeded from local history;
/// such links are auto-removed when that history is cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: Url,
    pub title: String,
    pub is_most_visited: bool,
}

/// A server-curated regional default suggestion. Read-only; the whole
/// catalog is replaced on each successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopularSite {
    pub title: String,
    pub url: Url,
    pub favicon_url: Option<Url>,
    pub large_icon_url: Option<Url>,
    pub title_source: TileTitleSource,
    pub baked_in: bool,
    /// Identifier of a built-in default icon, or -1 when there is none.
    pub default_icon_resource: i32,
}

/// One entry of the locally computed most-frequently-visited ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MostVisitedUrl {
    pub url: Url,
    pub title: String,
}
