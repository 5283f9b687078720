#![forbid(unsafe_code)]

//! Infinite pagination over the video listing.
//!
//! Pages are keyed by the current filter tuple. On the first mount of a list
//! context the engine replays as many page fetches as the user had loaded
//! before, one after the other, and then puts the viewport back where it was.

use std::{sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use parking_lot::{Mutex, MutexGuard};

use crate::api::{VideoFetcher, VideoPage, VideoQuery, VideoSummary, page_from_next_link};
use crate::events::{AppEvent, EventBus};
use crate::filters::video::VideoFilterState;
use crate::scroll::{ScrollPosition, ScrollPositionStore, VIDEOS_CONTEXT, Viewport};

pub const DEFAULT_PAGE_SIZE: u32 = 24;
pub const DEFAULT_RETRY_COUNT: u32 = 1;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Pause after restoring the offset so layout can catch up before normal
/// scroll handling resumes.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct PaginationOptions {
    /// Scroll position slot used for restoration.
    pub context: String,
    pub page_size: u32,
    /// Extra attempts per page after the first failure.
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub settle_delay: Duration,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            context: VIDEOS_CONTEXT.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Loading,
    Success,
    Error,
}

#[derive(Debug)]
struct PaginationState {
    filters: VideoFilterState,
    pages: Vec<VideoPage>,
    status: FetchStatus,
    is_fetching: bool,
    is_restoring: bool,
    mounted: bool,
    /// Bumped whenever the page sequence is invalidated; results of fetches
    /// started under an older generation are dropped.
    generation: u64,
    error: Option<String>,
}

impl PaginationState {
    fn next_page(&self) -> Option<u32> {
        let Some(last) = self.pages.last() else {
            return Some(1);
        };
        let next = last.next.as_deref()?;
        let fallback = u32::try_from(self.pages.len()).unwrap_or(u32::MAX).saturating_add(1);
        Some(page_from_next_link(next).unwrap_or(fallback))
    }

    fn reset(&mut self, filters: VideoFilterState) {
        self.filters = filters;
        self.pages.clear();
        self.status = FetchStatus::Idle;
        self.is_fetching = false;
        self.error = None;
        self.generation += 1;
    }
}

/// Cloning yields another handle onto the same page sequence.
pub struct InfiniteVideos<F> {
    inner: Arc<Inner<F>>,
}

impl<F> Clone for InfiniteVideos<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<F> {
    fetcher: F,
    positions: ScrollPositionStore,
    events: EventBus,
    options: PaginationOptions,
    state: Mutex<PaginationState>,
}

impl<F: VideoFetcher> InfiniteVideos<F> {
    pub fn new(
        fetcher: F,
        positions: ScrollPositionStore,
        events: EventBus,
        options: PaginationOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                positions,
                events,
                options,
                state: Mutex::new(PaginationState {
                    filters: VideoFilterState::default(),
                    pages: Vec::new(),
                    status: FetchStatus::Idle,
                    is_fetching: false,
                    is_restoring: false,
                    mounted: false,
                    generation: 0,
                    error: None,
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PaginationState> {
        self.inner.state.lock()
    }

    pub fn options(&self) -> &PaginationOptions {
        &self.inner.options
    }

    /// Loads the first page for `filters`. On the first mount only, a saved
    /// scroll position for this context is replayed afterwards.
    pub async fn mount(&self, filters: VideoFilterState, viewport: &dyn Viewport) -> Result<()> {
        let first_mount = {
            let mut state = self.state();
            let first = !state.mounted;
            state.mounted = true;
            first
        };
        let saved = if first_mount {
            self.inner.positions.get(&self.inner.options.context)
        } else {
            None
        };
        {
            let mut state = self.state();
            state.reset(filters);
            state.is_restoring = saved.is_some();
        }

        let first_page = self.fetch_next_page().await;
        match (first_page, saved) {
            (Ok(()), Some(saved)) => self.restore(saved, viewport).await,
            (result, _) => {
                self.state().is_restoring = false;
                result
            }
        }
    }

    async fn restore(&self, saved: ScrollPosition, viewport: &dyn Viewport) -> Result<()> {
        let context = &self.inner.options.context;
        tracing::debug!(
            context = %context,
            loaded_pages = saved.loaded_pages,
            scroll_y = saved.scroll_y,
            "restoring scroll position"
        );
        let mut outcome = Ok(());
        for _ in 1..saved.loaded_pages {
            if !self.has_next_page() {
                break;
            }
            if let Err(err) = self.fetch_next_page().await {
                outcome = Err(err);
                break;
            }
        }
        if outcome.is_ok() {
            viewport.scroll_to(saved.scroll_y);
            tokio::time::sleep(self.inner.options.settle_delay).await;
            self.inner.events.publish(AppEvent::ScrollRestored {
                context: context.clone(),
                scroll_y: saved.scroll_y,
            });
        }
        self.state().is_restoring = false;
        outcome
    }

    /// Switches to a new filter tuple. Equal tuples (tags compared as a set)
    /// keep the current pages; anything else restarts at page 1 without
    /// restoration.
    pub async fn set_filters(&self, filters: VideoFilterState) -> Result<()> {
        {
            let mut state = self.state();
            if state.mounted && state.filters.matches(&filters) {
                return Ok(());
            }
            tracing::debug!(?filters, "filters changed, restarting pagination");
            state.mounted = true;
            state.is_restoring = false;
            state.reset(filters);
        }
        self.fetch_next_page().await
    }

    /// Fetches the page after the last loaded one. Does nothing when there is
    /// no further page, a fetch is already running, or the last fetch failed
    /// (see [`Self::retry`]).
    pub async fn fetch_next_page(&self) -> Result<()> {
        let (generation, query) = {
            let mut state = self.state();
            if state.is_fetching || state.status == FetchStatus::Error {
                return Ok(());
            }
            let Some(page) = state.next_page() else {
                return Ok(());
            };
            state.is_fetching = true;
            if state.pages.is_empty() {
                state.status = FetchStatus::Loading;
            }
            let query = VideoQuery {
                filters: state.filters.clone(),
                page,
                page_size: self.inner.options.page_size,
            };
            (state.generation, query)
        };

        let result = self.fetch_with_retry(&query).await;

        let mut state = self.state();
        if state.generation != generation {
            tracing::debug!(page = query.page, "discarding page for superseded filters");
            return Ok(());
        }
        state.is_fetching = false;
        match result {
            Ok(page) => {
                state.pages.push(page);
                state.status = FetchStatus::Success;
                state.error = None;
                Ok(())
            }
            Err(err) => {
                state.status = FetchStatus::Error;
                state.error = Some(format!("{err:#}"));
                Err(err)
            }
        }
    }

    /// Manual retry after a failed fetch. Re-requests the page that failed.
    pub async fn retry(&self) -> Result<()> {
        {
            let mut state = self.state();
            if state.status != FetchStatus::Error {
                return Ok(());
            }
            state.status = if state.pages.is_empty() {
                FetchStatus::Idle
            } else {
                FetchStatus::Success
            };
            state.error = None;
        }
        self.fetch_next_page().await
    }

    async fn fetch_with_retry(&self, query: &VideoQuery) -> Result<VideoPage> {
        let options = &self.inner.options;
        let mut last_error = None;
        for attempt in 0..=options.retry_count {
            if attempt > 0 {
                tokio::time::sleep(options.retry_delay).await;
            }
            match self.inner.fetcher.fetch_videos(query).await {
                Ok(page) => return Ok(page),
                Err(err) => {
                    tracing::warn!(page = query.page, attempt, error = %err, "video page fetch failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("video page {} was never requested", query.page)))
    }

    pub fn filters(&self) -> VideoFilterState {
        self.state().filters.clone()
    }

    pub fn pages(&self) -> Vec<VideoPage> {
        self.state().pages.clone()
    }

    pub fn videos(&self) -> Vec<VideoSummary> {
        self.state()
            .pages
            .iter()
            .flat_map(|page| page.results.iter().cloned())
            .collect()
    }

    pub fn loaded_pages(&self) -> u32 {
        u32::try_from(self.state().pages.len()).unwrap_or(u32::MAX)
    }

    /// Total matches reported by the most recent page.
    pub fn total_count(&self) -> Option<u64> {
        self.state().pages.last().map(|page| page.count)
    }

    pub fn has_next_page(&self) -> bool {
        self.state().pages.last().is_some_and(VideoPage::has_next)
    }

    pub fn status(&self) -> FetchStatus {
        self.state().status
    }

    pub fn is_loading(&self) -> bool {
        self.status() == FetchStatus::Loading
    }

    pub fn is_fetching(&self) -> bool {
        self.state().is_fetching
    }

    pub fn is_success(&self) -> bool {
        self.status() == FetchStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status() == FetchStatus::Error
    }

    pub fn is_restoring(&self) -> bool {
        self.state().is_restoring
    }

    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::filters::WatchStatus;
    use crate::scroll::{ManualClock, MemoryViewport};
    use crate::storage::{MemoryStorage, NamespacedStorage, SESSION_ROOT_KEY};
    use anyhow::bail;
    use std::collections::HashMap;

    pub(crate) const NOW: i64 = 1_700_000_000_000;

    /// Serves `total_pages` pages of two videos each and records every
    /// request. Pages listed in `failures` fail that many times first.
    #[derive(Default)]
    pub(crate) struct ScriptedFetcher {
        pub(crate) total_pages: u32,
        pub(crate) delay: Duration,
        pub(crate) failures: Mutex<HashMap<u32, u32>>,
        pub(crate) calls: Mutex<Vec<VideoQuery>>,
    }

    impl ScriptedFetcher {
        pub(crate) fn new(total_pages: u32) -> Self {
            Self {
                total_pages,
                ..Self::default()
            }
        }

        pub(crate) fn requested_pages(&self) -> Vec<u32> {
            self.calls.lock().iter().map(|query| query.page).collect()
        }
    }

    impl VideoFetcher for ScriptedFetcher {
        async fn fetch_videos(&self, query: &VideoQuery) -> Result<VideoPage> {
            self.calls.lock().push(query.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let should_fail = {
                let mut failures = self.failures.lock();
                match failures.get_mut(&query.page) {
                    Some(remaining) if *remaining > 0 => {
                        *remaining -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if should_fail {
                bail!("backend unavailable for page {}", query.page);
            }
            let results = (0..2)
                .map(|index| VideoSummary {
                    uuid: format!("p{}-{index}", query.page),
                    title: format!("Video {index} on page {}", query.page),
                    channel_title: None,
                    thumbnail_url: None,
                    duration: None,
                    published_at: None,
                    is_watched: false,
                    watch_progress_seconds: 0,
                    is_not_interested: false,
                })
                .collect();
            let next = (query.page < self.total_pages)
                .then(|| format!("/api/videos/?page={}&page_size={}", query.page + 1, query.page_size));
            Ok(VideoPage {
                results,
                next,
                count: u64::from(self.total_pages) * 2,
            })
        }
    }

    pub(crate) fn positions() -> (ScrollPositionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let storage = Arc::new(NamespacedStorage::new(
            Arc::new(MemoryStorage::new()),
            SESSION_ROOT_KEY,
        ));
        (ScrollPositionStore::new(storage, clock.clone()), clock)
    }

    pub(crate) fn quick_options() -> PaginationOptions {
        PaginationOptions {
            retry_delay: Duration::ZERO,
            settle_delay: Duration::ZERO,
            ..PaginationOptions::default()
        }
    }

    fn engine(
        fetcher: Arc<ScriptedFetcher>,
        positions: ScrollPositionStore,
    ) -> InfiniteVideos<Arc<ScriptedFetcher>> {
        InfiniteVideos::new(fetcher, positions, EventBus::new(), quick_options())
    }

    fn watched() -> VideoFilterState {
        VideoFilterState {
            watch_status: WatchStatus::Watched,
            ..VideoFilterState::default()
        }
    }

    #[tokio::test]
    async fn mount_loads_first_page() {
        let fetcher = Arc::new(ScriptedFetcher::new(3));
        let (positions, _) = positions();
        let engine = engine(fetcher.clone(), positions);

        engine.mount(watched(), &MemoryViewport::default()).await.unwrap();

        assert_eq!(fetcher.requested_pages(), vec![1]);
        assert!(engine.is_success());
        assert!(engine.has_next_page());
        assert!(!engine.is_restoring());
        assert_eq!(engine.videos().len(), 2);
        assert_eq!(engine.total_count(), Some(6));
        assert_eq!(fetcher.calls.lock()[0].filters, watched());
    }

    #[tokio::test]
    async fn pages_follow_next_links_until_exhausted() {
        let fetcher = Arc::new(ScriptedFetcher::new(2));
        let (positions, _) = positions();
        let engine = engine(fetcher.clone(), positions);
        engine.mount(watched(), &MemoryViewport::default()).await.unwrap();

        engine.fetch_next_page().await.unwrap();
        assert!(!engine.has_next_page());
        engine.fetch_next_page().await.unwrap();

        assert_eq!(fetcher.requested_pages(), vec![1, 2]);
        assert_eq!(engine.loaded_pages(), 2);
    }

    #[tokio::test]
    async fn saved_position_replays_pages_then_scrolls() {
        let fetcher = Arc::new(ScriptedFetcher::new(10));
        let (positions, _) = positions();
        positions.save(
            VIDEOS_CONTEXT,
            ScrollPosition {
                scroll_y: 2400,
                loaded_pages: 3,
                timestamp: NOW,
                filters: watched(),
            },
        );
        let viewport = MemoryViewport::default();
        let events = EventBus::new();
        let mut received = events.subscribe();
        let engine = InfiniteVideos::new(fetcher.clone(), positions, events, quick_options());

        engine.mount(watched(), &viewport).await.unwrap();

        assert_eq!(fetcher.requested_pages(), vec![1, 2, 3]);
        assert_eq!(engine.loaded_pages(), 3);
        assert_eq!(viewport.scroll_y(), 2400);
        assert!(!engine.is_restoring());
        assert_eq!(
            received.recv().await.unwrap(),
            AppEvent::ScrollRestored {
                context: VIDEOS_CONTEXT.into(),
                scroll_y: 2400,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restoring_flag_holds_until_settled() {
        let fetcher = Arc::new(ScriptedFetcher::new(5));
        let (positions, _) = positions();
        positions.record(VIDEOS_CONTEXT, 300, 2, &watched());
        let options = PaginationOptions {
            settle_delay: Duration::from_millis(100),
            ..quick_options()
        };
        let engine = InfiniteVideos::new(fetcher.clone(), positions, EventBus::new(), options);
        let viewport = Arc::new(MemoryViewport::default());

        let task = {
            let engine = engine.clone();
            let viewport = viewport.clone();
            tokio::spawn(async move { engine.mount(watched(), viewport.as_ref()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.is_restoring());
        assert_eq!(viewport.scroll_y(), 300);

        task.await.unwrap().unwrap();
        assert!(!engine.is_restoring());
        assert_eq!(fetcher.requested_pages(), vec![1, 2]);
    }

    #[tokio::test]
    async fn restoration_stops_at_last_available_page() {
        let fetcher = Arc::new(ScriptedFetcher::new(2));
        let (positions, _) = positions();
        positions.record(VIDEOS_CONTEXT, 900, 5, &watched());
        let engine = engine(fetcher.clone(), positions);
        let viewport = MemoryViewport::default();

        engine.mount(watched(), &viewport).await.unwrap();

        assert_eq!(fetcher.requested_pages(), vec![1, 2]);
        assert_eq!(viewport.scroll_y(), 900);
    }

    #[tokio::test]
    async fn restoration_only_happens_on_first_mount() {
        let fetcher = Arc::new(ScriptedFetcher::new(10));
        let (positions, _) = positions();
        positions.record(VIDEOS_CONTEXT, 500, 3, &watched());
        let engine = engine(fetcher.clone(), positions);
        let viewport = MemoryViewport::default();
        engine.mount(watched(), &viewport).await.unwrap();
        fetcher.calls.lock().clear();

        engine.mount(watched(), &viewport).await.unwrap();
        assert_eq!(fetcher.requested_pages(), vec![1]);
    }

    #[tokio::test]
    async fn expired_position_is_not_restored() {
        let fetcher = Arc::new(ScriptedFetcher::new(10));
        let (positions, clock) = positions();
        positions.record(VIDEOS_CONTEXT, 500, 4, &watched());
        clock.advance(chrono::TimeDelta::minutes(31));
        let engine = engine(fetcher.clone(), positions);
        let viewport = MemoryViewport::default();

        engine.mount(watched(), &viewport).await.unwrap();

        assert_eq!(fetcher.requested_pages(), vec![1]);
        assert_eq!(viewport.scroll_y(), 0);
    }

    #[tokio::test]
    async fn changed_filters_restart_at_page_one() {
        let fetcher = Arc::new(ScriptedFetcher::new(10));
        let (positions, _) = positions();
        let engine = engine(fetcher.clone(), positions);
        let mut filters = watched();
        filters.selected_tags = vec!["a".into(), "b".into()];
        engine.mount(filters.clone(), &MemoryViewport::default()).await.unwrap();
        engine.fetch_next_page().await.unwrap();

        let mut reordered = filters.clone();
        reordered.selected_tags.reverse();
        engine.set_filters(reordered).await.unwrap();
        assert_eq!(fetcher.requested_pages(), vec![1, 2]);

        filters.search_query = "rust".into();
        engine.set_filters(filters.clone()).await.unwrap();
        assert_eq!(fetcher.requested_pages(), vec![1, 2, 1]);
        assert_eq!(engine.loaded_pages(), 1);
        assert_eq!(engine.filters(), filters);
    }

    #[tokio::test]
    async fn failed_page_keeps_earlier_pages_and_halts() {
        let fetcher = Arc::new(ScriptedFetcher::new(5));
        fetcher.failures.lock().insert(2, 2);
        let (positions, _) = positions();
        let engine = engine(fetcher.clone(), positions);
        engine.mount(watched(), &MemoryViewport::default()).await.unwrap();

        assert!(engine.fetch_next_page().await.is_err());
        assert!(engine.is_error());
        assert_eq!(engine.loaded_pages(), 1);
        assert!(engine.error().unwrap().contains("page 2"));
        assert_eq!(fetcher.requested_pages(), vec![1, 2, 2]);

        engine.fetch_next_page().await.unwrap();
        assert_eq!(fetcher.requested_pages(), vec![1, 2, 2]);

        engine.retry().await.unwrap();
        assert!(engine.is_success());
        assert_eq!(engine.loaded_pages(), 2);
        assert_eq!(fetcher.requested_pages(), vec![1, 2, 2, 2]);
    }

    #[tokio::test]
    async fn single_failure_is_absorbed_by_retry_budget() {
        let fetcher = Arc::new(ScriptedFetcher::new(2));
        fetcher.failures.lock().insert(1, 1);
        let (positions, _) = positions();
        let engine = engine(fetcher.clone(), positions);

        engine.mount(watched(), &MemoryViewport::default()).await.unwrap();
        assert!(engine.is_success());
        assert_eq!(fetcher.requested_pages(), vec![1, 1]);
    }

    #[tokio::test]
    async fn failing_first_page_surfaces_error_state() {
        let fetcher = Arc::new(ScriptedFetcher::new(2));
        fetcher.failures.lock().insert(1, 5);
        let (positions, _) = positions();
        positions.record(VIDEOS_CONTEXT, 100, 2, &watched());
        let engine = engine(fetcher.clone(), positions);

        assert!(engine.mount(watched(), &MemoryViewport::default()).await.is_err());
        assert!(engine.is_error());
        assert!(!engine.is_restoring());
        assert!(engine.pages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_fetch_once() {
        let fetcher = Arc::new(ScriptedFetcher {
            total_pages: 5,
            delay: Duration::from_millis(200),
            ..ScriptedFetcher::default()
        });
        let (positions, _) = positions();
        let engine = engine(fetcher.clone(), positions);
        engine.mount(watched(), &MemoryViewport::default()).await.unwrap();

        let (first, second) = tokio::join!(engine.fetch_next_page(), engine.fetch_next_page());
        first.unwrap();
        second.unwrap();
        assert_eq!(fetcher.requested_pages(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_page_from_old_filters_is_dropped() {
        let fetcher = Arc::new(ScriptedFetcher {
            total_pages: 5,
            delay: Duration::from_millis(200),
            ..ScriptedFetcher::default()
        });
        let (positions, _) = positions();
        let engine = engine(fetcher.clone(), positions);
        engine.mount(watched(), &MemoryViewport::default()).await.unwrap();

        let in_flight = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.fetch_next_page().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.set_filters(VideoFilterState::default()).await.unwrap();
        in_flight.await.unwrap().unwrap();

        assert_eq!(engine.loaded_pages(), 1);
        assert_eq!(engine.videos()[0].uuid, "p1-0");
        assert_eq!(engine.filters(), VideoFilterState::default());
    }
}
