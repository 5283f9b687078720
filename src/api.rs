#![forbid(unsafe_code)]

//! Client for the backend's paged video listing.
//!
//! The backend answers `GET /api/videos/` with a page envelope
//! (`results`, `next`, `count`). `next` is a link whose `page` query
//! parameter tells us which page comes after the current one.

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::events::{AppEvent, EventBus};
use crate::filters::video::VideoFilterState;
use crate::session::AppStore;

const VIDEOS_ENDPOINT: &str = "api/videos/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// One video row in a listing page. Unknown or missing fields are tolerated
/// so older backends keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub uuid: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default)]
    pub is_watched: bool,
    #[serde(default)]
    pub watch_progress_seconds: u64,
    #[serde(default)]
    pub is_not_interested: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoPage {
    #[serde(default)]
    pub results: Vec<VideoSummary>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub count: u64,
}

impl VideoPage {
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoQuery {
    pub filters: VideoFilterState,
    pub page: u32,
    pub page_size: u32,
}

impl VideoQuery {
    /// Backend query parameters for this request.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let filters = &self.filters;
        let mut pairs = vec![("watch_status", filters.watch_status.as_str().to_string())];
        if !filters.selected_tags.is_empty() {
            pairs.push(("tags", filters.selected_tags.join(",")));
        }
        if let Some(mode) = filters.effective_tag_mode() {
            pairs.push(("tag_mode", mode.as_str().to_string()));
        }
        let search = filters.search_query.trim();
        if !search.is_empty() {
            pairs.push(("search", search.to_string()));
        }
        pairs.push((
            "not_interested_filter",
            filters.not_interested_filter.as_str().to_string(),
        ));
        pairs.push(("page", self.page.to_string()));
        pairs.push(("page_size", self.page_size.to_string()));
        pairs
    }
}

/// Source of video listing pages.
pub trait VideoFetcher: Send + Sync + 'static {
    fn fetch_videos(&self, query: &VideoQuery) -> impl Future<Output = Result<VideoPage>> + Send;
}

impl<T: VideoFetcher> VideoFetcher for Arc<T> {
    fn fetch_videos(&self, query: &VideoQuery) -> impl Future<Output = Result<VideoPage>> + Send {
        (**self).fetch_videos(query)
    }
}

/// Reads the `page` parameter out of a `next` link. Relative links are
/// resolved against a dummy origin.
pub fn page_from_next_link(next: &str) -> Option<u32> {
    let base = Url::parse("http://localhost/").ok()?;
    let url = base.join(next).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse::<u32>().ok())
        .filter(|page| *page >= 1)
}

pub fn videos_url(base_url: &str, query: &VideoQuery) -> Result<Url> {
    let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
        .with_context(|| format!("invalid API base url {base_url:?}"))?;
    let mut url = base
        .join(VIDEOS_ENDPOINT)
        .context("building video listing url")?;
    url.query_pairs_mut()
        .extend_pairs(query.to_pairs().iter().map(|(key, value)| (*key, value.as_str())));
    Ok(url)
}

/// Blocking `ureq` client driven from the async side through
/// `spawn_blocking`. Credentials are forwarded as a bearer token.
#[derive(Clone)]
pub struct VideosClient {
    agent: ureq::Agent,
    base_url: String,
    store: Arc<AppStore>,
}

impl VideosClient {
    pub fn new(base_url: impl Into<String>, store: Arc<AppStore>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            agent,
            base_url: base_url.into(),
            store,
        }
    }

    fn fetch_blocking(
        agent: &ureq::Agent,
        url: &Url,
        token: Option<&str>,
        events: &EventBus,
    ) -> Result<VideoPage> {
        let mut request = agent.get(url.as_str()).set("Accept", "application/json");
        if let Some(token) = token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        match request.call() {
            Ok(response) => response
                .into_json::<VideoPage>()
                .context("decoding video listing"),
            Err(ureq::Error::Status(401, _)) => {
                events.publish(AppEvent::AuthRequired);
                bail!("backend rejected credentials (HTTP 401)")
            }
            Err(ureq::Error::Status(403, response)) => {
                let body = response.into_string().unwrap_or_default();
                if body.to_ascii_lowercase().contains("youtube") {
                    events.publish(AppEvent::YoutubeAuthRequired {
                        message: body.trim().to_string(),
                    });
                }
                bail!("backend refused video listing (HTTP 403)")
            }
            Err(ureq::Error::Status(code, _)) => bail!("backend returned HTTP {code}"),
            Err(err) => Err(anyhow!(err)).context("requesting video listing"),
        }
    }
}

impl VideoFetcher for VideosClient {
    async fn fetch_videos(&self, query: &VideoQuery) -> Result<VideoPage> {
        let url = videos_url(&self.base_url, query)?;
        let agent = self.agent.clone();
        let token = self.store.access_token();
        let events = self.store.events().clone();
        tracing::debug!(%url, "fetching video page");
        tokio::task::spawn_blocking(move || {
            Self::fetch_blocking(&agent, &url, token.as_deref(), &events)
        })
        .await
        .context("video listing task panicked")?
    }
}
