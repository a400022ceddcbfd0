use std::cell::RefCell;
use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use url::Url;

use mosaic_core::PopularSite;
use mosaic_logging::{mosaic_debug, mosaic_trace};

use crate::aggregator::IconPrefetcher;
use crate::popular_sites::TransportError;

#[derive(Debug, Error)]
pub enum IconError {
    #[error("icon bytes failed to decode: {0}")]
    Decode(String),
}

/// A decoded icon bitmap, ready for the icon store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedIcon {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl DecodedIcon {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IconError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|err| IconError::Decode(err.to_string()))?
            .to_rgba8();
        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            rgba: decoded.into_raw(),
        })
    }
}

/// Seam to the external favicon bitmap store, keyed by page URL.
pub trait IconStore {
    fn get(&self, page_url: &Url) -> Option<DecodedIcon>;
    fn set(&mut self, page_url: Url, icon: DecodedIcon);
}

/// In-memory icon store for tests and embedders without a real one.
#[derive(Debug, Default)]
pub struct MemoryIconStore {
    icons: HashMap<Url, DecodedIcon>,
}

impl MemoryIconStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IconStore for MemoryIconStore {
    fn get(&self, page_url: &Url) -> Option<DecodedIcon> {
        self.icons.get(page_url).cloned()
    }

    fn set(&mut self, page_url: Url, icon: DecodedIcon) {
        self.icons.insert(page_url, icon);
    }
}

#[async_trait(?Send)]
pub trait IconFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, TransportError>;
}

/// Icon download over HTTP.
pub struct HttpIconFetcher {
    client: reqwest::Client,
}

impl HttpIconFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpIconFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl IconFetcher for HttpIconFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
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
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|err| TransportError::Network(err.to_string()))
    }
}

/// One icon fetch request. Popular sites carry their own icon URL; any
/// other page goes through the large-icon service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconRequest {
    pub page_url: Url,
    pub icon_url: Option<Url>,
    pub default_icon_resource: i32,
}

impl IconRequest {
    pub fn for_popular_site(site: &PopularSite) -> Self {
        Self {
            page_url: site.url.clone(),
            icon_url: site.large_icon_url.clone().or_else(|| site.favicon_url.clone()),
            default_icon_resource: site.default_icon_resource,
        }
    }

    pub fn for_page(page_url: Url) -> Self {
        Self {
            page_url,
            icon_url: None,
            default_icon_resource: -1,
        }
    }
}

/// How a fetch resolved, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconOutcome {
    /// The store already had an icon; nothing was fetched.
    AlreadyCached,
    /// A fetch completed and the icon is newly available.
    NewlyAvailable,
    /// The fetch or decode failed; tile display is unaffected.
    Unavailable,
}

/// Coalesced, best-effort icon fetching. Concurrent requests for the
/// same icon URL share one underlying fetch; failures resolve silently.
pub struct IconCache<S: IconStore, F: IconFetcher> {
    store: RefCell<S>,
    fetcher: F,
    default_icons: HashMap<i32, DecodedIcon>,
    in_flight: RefCell<HashMap<Url, Vec<oneshot::Sender<bool>>>>,
}

impl<S: IconStore, F: IconFetcher> IconCache<S, F> {
    pub fn new(store: S, fetcher: F) -> Self {
        Self {
            store: RefCell::new(store),
            fetcher,
            default_icons: HashMap::new(),
            in_flight: RefCell::new(HashMap::new()),
        }
    }

    /// Decodes and registers a built-in default icon resource, used as
    /// a preliminary stand-in while the real icon downloads.
    pub fn register_default_icon(&mut self, resource: i32, bytes: &[u8]) -> Result<(), IconError> {
        let icon = DecodedIcon::from_bytes(bytes)?;
        self.default_icons.insert(resource, icon);
        Ok(())
    }

    pub async fn start_fetch(&self, request: &IconRequest) -> IconOutcome {
        self.start_fetch_with_preliminary(request, |_| {}).await
    }

    /// Fetches the icon for `request`, coalescing onto any fetch
    /// already in flight for the same URL. `on_preliminary` receives
    /// the decoded built-in default icon, if one is registered, before
    /// the network is consulted.
    pub async fn start_fetch_with_preliminary(
        &self,
        request: &IconRequest,
        on_preliminary: impl FnOnce(&DecodedIcon),
    ) -> IconOutcome {
        let fetch_url = match self.fetch_url(request) {
            Some(url) => url,
            None => return IconOutcome::Unavailable,
        };

        // Join a fetch that is already outstanding for this URL.
        let waiter = {
            let mut in_flight = self.in_flight.borrow_mut();
            in_flight.get_mut(&fetch_url).map(|waiters| {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                rx
            })
        };
        if let Some(rx) = waiter {
            mosaic_trace!("Coalescing icon fetch for {fetch_url}");
            return match rx.await {
                Ok(true) => IconOutcome::NewlyAvailable,
                _ => IconOutcome::Unavailable,
            };
        }

        // An icon already in the store resolves without a fetch, and
        // without a "newly available" signal.
        if self.store.borrow().get(&request.page_url).is_some() {
            return IconOutcome::AlreadyCached;
        }

        self.in_flight.borrow_mut().insert(fetch_url.clone(), Vec::new());

        if let Some(default_icon) = self.default_icons.get(&request.default_icon_resource) {
            on_preliminary(default_icon);
        }

        let newly_available = match self.fetcher.fetch(&fetch_url).await {
            Ok(bytes) => match DecodedIcon::from_bytes(&bytes) {
                Ok(icon) => {
                    self.store.borrow_mut().set(request.page_url.clone(), icon);
                    true
                }
                Err(err) => {
                    mosaic_debug!("Icon from {fetch_url} failed to decode: {err}");
                    false
                }
            },
            Err(err) => {
                mosaic_debug!("Icon fetch from {fetch_url} failed: {err}");
                false
            }
        };

        let waiters = self
            .in_flight
            .borrow_mut()
            .remove(&fetch_url)
            .unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(newly_available);
        }

        if newly_available {
            IconOutcome::NewlyAvailable
        } else {
            IconOutcome::Unavailable
        }
    }

    fn fetch_url(&self, request: &IconRequest) -> Option<Url> {
        if let Some(icon_url) = &request.icon_url {
            return Some(icon_url.clone());
        }
        // Arbitrary page URLs go through the large-icon service.
        let mut url = Url::parse("https://t0.gstatic.com/faviconV2").ok()?;
        url.query_pairs_mut()
            .append_pair("client", "NTP")
            .append_pair("size", "96")
            .append_pair("url", request.page_url.as_str());
        Some(url)
    }
}

/// Fire-and-forget prefetch seam for the aggregator: requests pile up
/// here and the embedder drains them into an [`IconCache`].
#[derive(Default)]
pub struct IconFetchQueue {
    queued: RefCell<Vec<IconRequest>>,
}

impl IconFetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<IconRequest> {
        self.queued.borrow_mut().drain(..).collect()
    }

    /// Empties the queue into `cache`, fetching each queued icon.
    /// Outcomes are dropped; a tile with a missing icon is not an
    /// error. Requests queued while a drain is running wait for the
    /// next one.
    pub async fn drain_into<S: IconStore, F: IconFetcher>(&self, cache: &IconCache<S, F>) {
        for request in self.drain() {
            cache.start_fetch(&request).await;
        }
    }
}

impl IconPrefetcher for IconFetchQueue {
    fn prefetch(&self, site: &PopularSite) {
        self.queued.borrow_mut().push(IconRequest::for_popular_site(site));
    }
}
