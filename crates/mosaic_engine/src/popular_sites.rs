use std::cell::RefCell;
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use mosaic_core::{keys, PopularSite, PrefStore, SectionType, SharedPrefs};
use mosaic_logging::{mosaic_debug, mosaic_info, mosaic_warn};

use crate::aggregator::PopularSitesProvider;
use crate::catalog::{parse_catalog, CatalogParseError};

const BASE_URL: &str = "https://www.gstatic.com/";
const DEFAULT_DIRECTORY: &str = "chrome/ntp/";
const DEFAULT_COUNTRY: &str = "DEFAULT";
const DEFAULT_VERSION: &str = "6";

/// How long a cached catalog stays fresh.
const REDOWNLOAD_INTERVAL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Parse(#[from] CatalogParseError),
}

/// Time source seam so the cache-freshness check is testable.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Experiment-provided fetch-URL parameters; every component falls back
/// to its built-in default when absent.
pub trait VariationsSource {
    fn directory(&self) -> Option<String> {
        None
    }
    fn country(&self) -> Option<String> {
        None
    }
    fn version(&self) -> Option<String> {
        None
    }
}

/// No experiment configuration at all.
pub struct NoVariations;

impl VariationsSource for NoVariations {}

#[async_trait(?Send)]
pub trait CatalogTransport {
    async fn download(&self, url: &Url) -> Result<String, TransportError>;
}

/// Catalog download over HTTP.
pub struct HttpCatalogTransport {
    client: reqwest::Client,
}

impl HttpCatalogTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpCatalogTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl CatalogTransport for HttpCatalogTransport {
    async fn download(&self, url: &Url) -> Result<String, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }
        response
            .text()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))
    }
}

/// Downloads and caches the sectioned catalog of server-curated
/// "popular" sites, resolving its fetch URL from override prefs,
/// experiment parameters, and built-in defaults.
pub struct PopularSitesFetcher<T: CatalogTransport> {
    prefs: SharedPrefs,
    variations: Box<dyn VariationsSource>,
    clock: Box<dyn Clock>,
    transport: T,
    sections: BTreeMap<SectionType, Vec<PopularSite>>,
}

impl<T: CatalogTransport> PopularSitesFetcher<T> {
    /// Restores the cached catalog, if any, so tiles can be built
    /// before the first network fetch completes.
    pub fn new(
        prefs: SharedPrefs,
        variations: Box<dyn VariationsSource>,
        clock: Box<dyn Clock>,
        transport: T,
    ) -> Self {
        let sections = load_cached_sections(&prefs);
        Self {
            prefs,
            variations,
            clock,
            transport,
            sections,
        }
    }

    pub fn sections(&self) -> &BTreeMap<SectionType, Vec<PopularSite>> {
        &self.sections
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn personalized(&self) -> &[PopularSite] {
        self.sections
            .get(&SectionType::Personalized)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Starts a catalog fetch when one is warranted and reports the
    /// outcome through `on_complete`. Returns `false` without touching
    /// cached data when the cache is fresh, was fetched from the same
    /// resolved URL, and no force was requested.
    pub async fn maybe_start_fetch(&mut self, force: bool, on_complete: impl FnOnce(bool)) -> bool {
        let url = self.resolved_fetch_url();
        if !force && !self.is_cache_stale(&url) {
            return false;
        }
        let version = self.resolved_version();
        self.fetch_with_fallback(url, version, on_complete).await;
        true
    }

    /// The URL the next fetch would use: a whole-URL override wins,
    /// otherwise directory, country, and version are each resolved as
    /// override pref, then experiment value, then built-in default.
    pub fn resolved_fetch_url(&self) -> Url {
        if let Some(override_url) = self
            .pref_string(keys::POPULAR_SITES_OVERRIDE_URL)
            .and_then(|raw| Url::parse(&raw).ok())
        {
            return override_url;
        }
        let directory = self.resolved_directory();
        let country = self
            .pref_string(keys::POPULAR_SITES_OVERRIDE_COUNTRY)
            .or_else(|| self.variations.country())
            .unwrap_or_else(|| DEFAULT_COUNTRY.to_string());
        let version = self.resolved_version_string();
        catalog_url(&directory, &country, &version)
    }

    fn resolved_directory(&self) -> String {
        self.pref_string(keys::POPULAR_SITES_OVERRIDE_DIRECTORY)
            .or_else(|| self.variations.directory())
            .unwrap_or_else(|| DEFAULT_DIRECTORY.to_string())
    }

    fn resolved_version_string(&self) -> String {
        self.pref_string(keys::POPULAR_SITES_OVERRIDE_VERSION)
            .or_else(|| self.variations.version())
            .unwrap_or_else(|| DEFAULT_VERSION.to_string())
    }

    fn resolved_version(&self) -> u32 {
        parse_version(&self.resolved_version_string())
    }

    fn is_cache_stale(&self, url: &Url) -> bool {
        let last_url = self.pref_string(keys::SUGGESTED_SITES_URL);
        if last_url.as_deref() != Some(url.as_str()) {
            return true;
        }
        let Some(last_download) = self
            .prefs
            .borrow()
            .get(keys::SUGGESTED_SITES_LAST_DOWNLOAD)
            .and_then(|value| value.as_i64())
        else {
            return true;
        };
        let now = self.clock.now().timestamp_millis();
        let age_hours = (now - last_download) / (60 * 60 * 1000);
        // A timestamp in the future means the clock moved backwards;
        // refetch rather than trusting it.
        last_download > now || age_hours >= REDOWNLOAD_INTERVAL_HOURS
    }

    async fn fetch_with_fallback(&mut self, url: Url, version: u32, on_complete: impl FnOnce(bool)) {
        match self.fetch_once(&url, version).await {
            Ok(()) => on_complete(true),
            Err(err) => {
                mosaic_warn!("Popular sites fetch from {url} failed: {err}");
                let fallback = catalog_url(&self.resolved_directory(), DEFAULT_COUNTRY, DEFAULT_VERSION);
                if fallback == url {
                    on_complete(false);
                    return;
                }
                match self.fetch_once(&fallback, parse_version(DEFAULT_VERSION)).await {
                    Ok(()) => on_complete(true),
                    Err(fallback_err) => {
                        mosaic_warn!(
                            "Popular sites fallback fetch from {fallback} failed: {fallback_err}"
                        );
                        on_complete(false);
                    }
                }
            }
        }
    }

    async fn fetch_once(&mut self, url: &Url, version: u32) -> Result<(), CatalogError> {
        let body = self.transport.download(url).await?;
        let sections = parse_catalog(&body, version)?;
        let site_count: usize = sections.values().map(Vec::len).sum();
        mosaic_info!("Downloaded popular sites catalog v{version} with {site_count} sites");

        // Blob, version, URL, and timestamp are persisted together so
        // the freshness check above stays coherent.
        let now = self.clock.now().timestamp_millis();
        {
            let mut prefs = self.prefs.borrow_mut();
            prefs.set(keys::SUGGESTED_SITES_JSON, Value::String(body));
            prefs.set(keys::SUGGESTED_SITES_VERSION, Value::from(version));
            prefs.set(keys::SUGGESTED_SITES_URL, Value::String(url.to_string()));
            prefs.set(keys::SUGGESTED_SITES_LAST_DOWNLOAD, Value::from(now));
        }
        self.sections = sections;
        Ok(())
    }

    fn pref_string(&self, key: &str) -> Option<String> {
        self.prefs
            .borrow()
            .get(key)
            .and_then(|value| value.as_str().map(str::to_string))
    }
}

impl<T: CatalogTransport> PopularSitesProvider for RefCell<PopularSitesFetcher<T>> {
    fn personalized_sites(&self) -> Vec<PopularSite> {
        self.borrow().personalized().to_vec()
    }
}

fn catalog_url(directory: &str, country: &str, version: &str) -> Url {
    let raw = format!("{BASE_URL}{directory}suggested_sites_{country}_{version}.json");
    Url::parse(&raw).unwrap_or_else(|_| {
        // Unparsable override components fall back to the default URL.
        let raw = format!(
            "{BASE_URL}{DEFAULT_DIRECTORY}suggested_sites_{DEFAULT_COUNTRY}_{DEFAULT_VERSION}.json"
        );
        Url::parse(&raw).expect("default catalog url is valid")
    })
}

fn parse_version(version: &str) -> u32 {
    version.parse().unwrap_or(6)
}

fn load_cached_sections(prefs: &SharedPrefs) -> BTreeMap<SectionType, Vec<PopularSite>> {
    let (raw, version) = {
        let prefs = prefs.borrow();
        let raw = prefs
            .get(keys::SUGGESTED_SITES_JSON)
            .and_then(|value| value.as_str().map(str::to_string));
        let version = prefs
            .get(keys::SUGGESTED_SITES_VERSION)
            .and_then(|value| value.as_u64())
            .map(|version| version as u32)
            .unwrap_or(6);
        (raw, version)
    };
    let Some(raw) = raw else {
        return BTreeMap::new();
    };
    match parse_catalog(&raw, version) {
        Ok(sections) => sections,
        Err(err) => {
            mosaic_debug!("Ignoring unparsable cached popular sites catalog: {err}");
            BTreeMap::new()
        }
    }
}
