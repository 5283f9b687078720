#![forbid(unsafe_code)]

//! Saved scroll depth per list context, so a back navigation can return the
//! user to where they were.

use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
};

use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::filters::video::VideoFilterState;
use crate::storage::NamespacedStorage;

/// Field of the session namespace holding every saved position.
pub const SCROLL_POSITIONS_FIELD: &str = "scroll_positions";

/// Positions older than this are treated as absent and deleted on read.
pub const SCROLL_POSITION_TTL: TimeDelta = TimeDelta::minutes(30);

pub const VIDEOS_CONTEXT: &str = "videos";
pub const CHANNELS_CONTEXT: &str = "channels";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollPosition {
    pub scroll_y: u64,
    pub loaded_pages: u32,
    /// Epoch milliseconds of the save.
    pub timestamp: i64,
    #[serde(default)]
    pub filters: VideoFilterState,
}

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: TimeDelta) {
        self.now.fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// The scrollable surface hosting a list: reports and moves the vertical
/// offset.
pub trait Viewport: Send + Sync {
    fn scroll_y(&self) -> u64;
    fn scroll_to(&self, y: u64);
}

#[derive(Debug, Default)]
pub struct MemoryViewport {
    offset: AtomicU64,
}

impl MemoryViewport {
    pub fn new(offset: u64) -> Self {
        Self {
            offset: AtomicU64::new(offset),
        }
    }
}

impl Viewport for MemoryViewport {
    fn scroll_y(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    fn scroll_to(&self, y: u64) {
        self.offset.store(y, Ordering::SeqCst);
    }
}

/// Entries stay raw JSON so one unreadable context never hides the others.
type PositionMap = Map<String, Value>;

/// Scroll positions keyed by list context, stored under
/// [`SCROLL_POSITIONS_FIELD`] of the session namespace. Cloning shares the
/// same storage.
#[derive(Clone)]
pub struct ScrollPositionStore {
    storage: Arc<NamespacedStorage>,
    clock: Arc<dyn Clock>,
}

impl ScrollPositionStore {
    pub fn new(storage: Arc<NamespacedStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn save(&self, key: &str, position: ScrollPosition) {
        let entry = match serde_json::to_value(&position) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to serialize scroll position");
                return;
            }
        };
        self.storage
            .update_item::<PositionMap, _>(SCROLL_POSITIONS_FIELD, |positions| {
                let mut positions = positions.unwrap_or_default();
                positions.insert(key.to_string(), entry);
                Some(positions)
            });
    }

    /// Saves the current offset stamped with the store's clock.
    pub fn record(&self, key: &str, scroll_y: u64, loaded_pages: u32, filters: &VideoFilterState) {
        let position = ScrollPosition {
            scroll_y,
            loaded_pages: loaded_pages.max(1),
            timestamp: self.now_millis(),
            filters: filters.clone(),
        };
        tracing::debug!(key, scroll_y, loaded_pages = position.loaded_pages, "saving scroll position");
        self.save(key, position);
    }

    /// Returns the saved position unless it expired; expired and unreadable
    /// entries are removed as part of the read.
    pub fn get(&self, key: &str) -> Option<ScrollPosition> {
        let mut positions: PositionMap = self.storage.get_item(SCROLL_POSITIONS_FIELD)?;
        let entry = positions.remove(key)?;
        let position = match serde_json::from_value::<ScrollPosition>(entry) {
            Ok(position) => position,
            Err(err) => {
                tracing::warn!(key, error = %err, "discarding unreadable scroll position");
                self.clear(key);
                return None;
            }
        };
        match self.now_millis().checked_sub(position.timestamp) {
            Some(age) if age <= SCROLL_POSITION_TTL.num_milliseconds() => Some(position),
            age => {
                tracing::debug!(key, age_ms = ?age, "dropping expired scroll position");
                self.clear(key);
                None
            }
        }
    }

    pub fn clear(&self, key: &str) {
        self.storage
            .update_item::<PositionMap, _>(SCROLL_POSITIONS_FIELD, |positions| {
                let mut positions = positions?;
                positions.remove(key);
                (!positions.is_empty()).then_some(positions)
            });
    }
}
