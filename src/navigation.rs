#![forbid(unsafe_code)]

//! Host navigation seam. The filter controllers read the current location
//! through [`Navigator`] and push exactly one new entry per mutation.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::query::{QueryParams, join_url, split_url};

pub trait Navigator {
    /// Path of the current location, without query or fragment.
    fn pathname(&self) -> String;

    /// Query string of the current location, without the leading `?`.
    fn search(&self) -> String;

    /// Navigates to `url` (path plus optional query), adding a history entry.
    fn push(&self, url: &str);

    fn query(&self) -> QueryParams {
        QueryParams::parse(&self.search())
    }
}

impl<N: Navigator + ?Sized> Navigator for &N {
    fn pathname(&self) -> String {
        (**self).pathname()
    }

    fn search(&self) -> String {
        (**self).search()
    }

    fn push(&self, url: &str) {
        (**self).push(url)
    }
}

/// Pushes `params` onto the current path.
pub(crate) fn push_query(navigator: &impl Navigator, params: &QueryParams) {
    let url = join_url(&navigator.pathname(), params);
    tracing::debug!(%url, "navigating");
    navigator.push(&url);
}

/// In-process history used by the terminal shell and by tests. Cloning shares
/// the same history.
#[derive(Debug, Clone)]
pub struct MemoryNavigator {
    history: Arc<Mutex<Vec<String>>>,
}

impl MemoryNavigator {
    pub fn new(initial_url: &str) -> Self {
        Self {
            history: Arc::new(Mutex::new(vec![initial_url.to_string()])),
        }
    }

    pub fn current_url(&self) -> String {
        self.history.lock().last().cloned().unwrap_or_default()
    }

    /// Every entry, oldest first, including the initial location.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }

    /// Number of navigations issued since construction.
    pub fn push_count(&self) -> usize {
        self.history.lock().len().saturating_sub(1)
    }

    /// Pops the latest entry like a browser back button. The initial entry is
    /// never removed.
    pub fn back(&self) -> Option<String> {
        let mut history = self.history.lock();
        if history.len() > 1 {
            history.pop();
        }
        history.last().cloned()
    }
}

impl Navigator for MemoryNavigator {
    fn pathname(&self) -> String {
        split_url(&self.current_url()).0.to_string()
    }

    fn search(&self) -> String {
        split_url(&self.current_url()).1.to_query_string()
    }

    fn push(&self, url: &str) {
        self.history.lock().push(url.to_string());
    }
}
