#![forbid(unsafe_code)]

//! Scroll-driven page loading and scroll position persistence for a list
//! view.
//!
//! In automatic mode the view reports "the end-of-list sentinel became
//! visible" through a [`SentinelHandle`], and the next page is requested when
//! one exists and nothing is in flight. In manual mode no listener is
//! installed and the view offers [`InfiniteScroll::load_more`] instead.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::api::VideoFetcher;
use crate::filters::video::VideoFilterState;
use crate::pagination::InfiniteVideos;
use crate::scroll::{ScrollPositionStore, Viewport};
use crate::session::ScrollMode;

pub const SCROLL_SAVE_DEBOUNCE: Duration = Duration::from_secs(1);

/// Runs the most recently scheduled action once `delay` has passed without a
/// newer schedule. Scheduling cancels whatever was pending.
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Must be called from within a Tokio runtime.
    pub fn schedule<A>(&self, action: A)
    where
        A: FnOnce() + Send + 'static,
    {
        let delay = self.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        });
        if let Some(previous) = self.pending.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.pending.lock().take() {
            previous.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub struct InfiniteScroll<F> {
    engine: InfiniteVideos<F>,
    positions: ScrollPositionStore,
    viewport: Arc<dyn Viewport>,
    context: String,
    mode: ScrollMode,
    debouncer: Debouncer,
    last_filters: Mutex<Option<VideoFilterState>>,
}

impl<F: VideoFetcher> InfiniteScroll<F> {
    pub fn new(
        engine: InfiniteVideos<F>,
        positions: ScrollPositionStore,
        viewport: Arc<dyn Viewport>,
        mode: ScrollMode,
    ) -> Self {
        let context = engine.options().context.clone();
        Self {
            engine,
            positions,
            viewport,
            context,
            mode,
            debouncer: Debouncer::new(SCROLL_SAVE_DEBOUNCE),
            last_filters: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> ScrollMode {
        self.mode
    }

    pub fn engine(&self) -> &InfiniteVideos<F> {
        &self.engine
    }

    /// Starts listening for sentinel visibility. Returns `None` in manual
    /// mode, where nothing is observed.
    pub fn install(self: &Arc<Self>) -> Option<SentinelHandle> {
        if self.mode == ScrollMode::Manual {
            return None;
        }
        let (sender, mut receiver) = mpsc::unbounded_channel::<()>();
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            while receiver.recv().await.is_some() {
                if let Err(err) = this.on_sentinel_visible().await {
                    tracing::warn!(context = %this.context, error = %err, "automatic page load failed");
                }
            }
        });
        Some(SentinelHandle { sender, task })
    }

    /// Reacts to the sentinel becoming visible. Returns whether a page was
    /// requested.
    pub async fn on_sentinel_visible(&self) -> Result<bool> {
        if self.mode == ScrollMode::Manual || !self.can_fetch() || self.engine.is_restoring() {
            return Ok(false);
        }
        self.engine.fetch_next_page().await?;
        Ok(true)
    }

    /// Explicit "load more" affordance, available in either mode. Ignored
    /// while a saved position is being replayed.
    pub async fn load_more(&self) -> Result<bool> {
        if !self.can_fetch() || self.engine.is_restoring() {
            return Ok(false);
        }
        self.engine.fetch_next_page().await?;
        Ok(true)
    }

    fn can_fetch(&self) -> bool {
        self.engine.has_next_page() && !self.engine.is_fetching() && !self.engine.is_error()
    }

    /// Schedules a debounced save of the current offset.
    pub fn on_scroll(&self) {
        let engine = self.engine.clone();
        let positions = self.positions.clone();
        let viewport = Arc::clone(&self.viewport);
        let context = self.context.clone();
        self.debouncer.schedule(move || {
            let filters = engine.filters();
            persist(&engine, &positions, viewport.as_ref(), &context, &filters);
        });
    }

    /// Saves immediately when the filter tuple differs from the last one
    /// seen. The first call only records the baseline, and page-count
    /// changes alone never save here.
    pub fn sync_filters(&self, filters: &VideoFilterState) -> bool {
        let changed = {
            let mut last = self.last_filters.lock();
            let changed = last.as_ref().is_some_and(|previous| !previous.matches(filters));
            *last = Some(filters.clone());
            changed
        };
        if changed {
            persist(
                &self.engine,
                &self.positions,
                self.viewport.as_ref(),
                &self.context,
                filters,
            );
        }
        changed
    }

    /// Saves right away, bypassing the debounce.
    pub fn save_now(&self) {
        let filters = self.engine.filters();
        persist(
            &self.engine,
            &self.positions,
            self.viewport.as_ref(),
            &self.context,
            &filters,
        );
    }

    pub fn has_pending_save(&self) -> bool {
        self.debouncer.is_pending()
    }
}

fn persist<F: VideoFetcher>(
    engine: &InfiniteVideos<F>,
    positions: &ScrollPositionStore,
    viewport: &dyn Viewport,
    context: &str,
    filters: &VideoFilterState,
) {
    if engine.is_restoring() {
        tracing::debug!(context, "skipping scroll save during restoration");
        return;
    }
    positions.record(context, viewport.scroll_y(), engine.loaded_pages(), filters);
}

/// Live sentinel listener. Dropping it uninstalls the listener.
pub struct SentinelHandle {
    sender: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl SentinelHandle {
    /// Signals that the sentinel entered the viewport. Returns `false` once
    /// the listener is gone.
    pub fn notify_visible(&self) -> bool {
        self.sender.send(()).is_ok()
    }
}

impl Drop for SentinelHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::filters::WatchStatus;
    use crate::pagination::PaginationOptions;
    use crate::pagination::tests::{ScriptedFetcher, positions, quick_options};
    use crate::scroll::{MemoryViewport, VIDEOS_CONTEXT};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        fetcher: Arc<ScriptedFetcher>,
        positions: ScrollPositionStore,
        viewport: Arc<MemoryViewport>,
        scroll: Arc<InfiniteScroll<Arc<ScriptedFetcher>>>,
    }

    async fn harness(mode: ScrollMode, total_pages: u32) -> Harness {
        let fetcher = Arc::new(ScriptedFetcher::new(total_pages));
        let (positions, _) = positions();
        let engine = InfiniteVideos::new(
            fetcher.clone(),
            positions.clone(),
            EventBus::new(),
            quick_options(),
        );
        let viewport = Arc::new(MemoryViewport::default());
        engine
            .mount(VideoFilterState::default(), viewport.as_ref())
            .await
            .unwrap();
        let scroll = Arc::new(InfiniteScroll::new(
            engine,
            positions.clone(),
            viewport.clone(),
            mode,
        ));
        Harness {
            fetcher,
            positions,
            viewport,
            scroll,
        }
    }

    #[tokio::test]
    async fn visible_sentinel_loads_next_page_in_auto_mode() {
        let h = harness(ScrollMode::Auto, 3).await;
        assert!(h.scroll.on_sentinel_visible().await.unwrap());
        assert!(h.scroll.on_sentinel_visible().await.unwrap());
        assert!(!h.scroll.on_sentinel_visible().await.unwrap());
        assert_eq!(h.fetcher.requested_pages(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn manual_mode_installs_nothing_and_offers_load_more() {
        let h = harness(ScrollMode::Manual, 3).await;
        assert!(h.scroll.install().is_none());
        assert!(!h.scroll.on_sentinel_visible().await.unwrap());
        assert!(h.scroll.load_more().await.unwrap());
        assert_eq!(h.fetcher.requested_pages(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn installed_listener_reacts_to_signals() {
        let h = harness(ScrollMode::Auto, 5).await;
        let handle = h.scroll.install().unwrap();
        assert!(handle.notify_visible());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.fetcher.requested_pages(), vec![1, 2]);

        drop(handle);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.fetcher.requested_pages(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_saves_are_debounced_last_write_wins() {
        let h = harness(ScrollMode::Auto, 5).await;
        h.viewport.scroll_to(100);
        h.scroll.on_scroll();
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.viewport.scroll_to(700);
        h.scroll.on_scroll();
        assert!(h.positions.get(VIDEOS_CONTEXT).is_none());

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(h.positions.get(VIDEOS_CONTEXT).is_none());
        assert!(h.scroll.has_pending_save());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let saved = h.positions.get(VIDEOS_CONTEXT).unwrap();
        assert_eq!(saved.scroll_y, 700);
        assert_eq!(saved.loaded_pages, 1);
    }

    #[tokio::test]
    async fn filter_change_saves_immediately_but_page_loads_do_not() {
        let h = harness(ScrollMode::Auto, 5).await;
        let base = VideoFilterState::default();
        assert!(!h.scroll.sync_filters(&base));

        h.scroll.load_more().await.unwrap();
        assert!(!h.scroll.sync_filters(&base));
        assert!(h.positions.get(VIDEOS_CONTEXT).is_none());

        h.viewport.scroll_to(1234);
        let changed = VideoFilterState {
            watch_status: WatchStatus::All,
            ..VideoFilterState::default()
        };
        assert!(h.scroll.sync_filters(&changed));
        let saved = h.positions.get(VIDEOS_CONTEXT).unwrap();
        assert_eq!(saved.scroll_y, 1234);
        assert_eq!(saved.loaded_pages, 2);
        assert_eq!(saved.filters, changed);
    }

    #[tokio::test]
    async fn failed_fetch_blocks_automatic_loading() {
        let h = harness(ScrollMode::Auto, 5).await;
        h.fetcher.failures.lock().insert(2, 2);
        assert!(h.scroll.on_sentinel_visible().await.is_err());
        assert!(!h.scroll.on_sentinel_visible().await.unwrap());
        assert_eq!(h.fetcher.requested_pages(), vec![1, 2, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_cancel_drops_pending_action() {
        let runs = Arc::new(AtomicUsize::new(0));
        let debouncer = Debouncer::new(Duration::from_millis(100));
        for _ in 0..3 {
            let runs = runs.clone();
            debouncer.schedule(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let pending = runs.clone();
        debouncer.schedule(move || {
            pending.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn load_more_waits_for_restoration() {
        let fetcher = Arc::new(ScriptedFetcher::new(6));
        let (positions, _) = positions();
        positions.record(VIDEOS_CONTEXT, 400, 2, &VideoFilterState::default());
        let options = PaginationOptions {
            settle_delay: Duration::from_millis(100),
            ..quick_options()
        };
        let engine = InfiniteVideos::new(fetcher.clone(), positions.clone(), EventBus::new(), options);
        let viewport = Arc::new(MemoryViewport::default());
        let scroll = InfiniteScroll::new(engine.clone(), positions, viewport.clone(), ScrollMode::Manual);

        let mount = {
            let engine = engine.clone();
            let viewport = viewport.clone();
            tokio::spawn(async move {
                engine
                    .mount(VideoFilterState::default(), viewport.as_ref())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.is_restoring());
        assert!(!scroll.load_more().await.unwrap());

        mount.await.unwrap().unwrap();
        assert_eq!(fetcher.requested_pages(), vec![1, 2]);
        assert!(scroll.load_more().await.unwrap());
        assert_eq!(fetcher.requested_pages(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn save_now_records_current_depth() {
        let h = harness(ScrollMode::Auto, 5).await;
        h.viewport.scroll_to(42);
        h.scroll.save_now();
        assert_eq!(h.positions.get(VIDEOS_CONTEXT).unwrap().scroll_y, 42);
    }
}
