#![forbid(unsafe_code)]

//! Video list filters and their query-string representation.
//!
//! Query surface:
//! `filter`, `tags` (comma-joined), `tag_mode` (only with more than one tag),
//! `search`, `not_interested_filter`.

use serde::{Deserialize, Serialize};

use super::{NotInterestedFilter, TagMode, WatchStatus, same_tag_set};
use crate::navigation::{Navigator, push_query};
use crate::query::{QueryParams, join_list, split_list};

pub const FILTER_PARAM: &str = "filter";
pub const TAGS_PARAM: &str = "tags";
pub const TAG_MODE_PARAM: &str = "tag_mode";
pub const SEARCH_PARAM: &str = "search";
pub const NOT_INTERESTED_PARAM: &str = "not_interested_filter";

/// The filter tuple that determines which videos are fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFilterState {
    #[serde(default)]
    pub watch_status: WatchStatus,
    #[serde(default)]
    pub selected_tags: Vec<String>,
    #[serde(default)]
    pub tag_mode: TagMode,
    #[serde(default)]
    pub search_query: String,
    #[serde(default)]
    pub not_interested_filter: NotInterestedFilter,
}

impl VideoFilterState {
    pub fn from_query(params: &QueryParams) -> Self {
        let selected_tags = split_list(params.get(TAGS_PARAM));
        let tag_mode = if selected_tags.len() > 1 {
            TagMode::from_param(params.get(TAG_MODE_PARAM))
        } else {
            TagMode::default()
        };
        Self {
            watch_status: WatchStatus::from_param(params.get(FILTER_PARAM)),
            selected_tags,
            tag_mode,
            search_query: params.get(SEARCH_PARAM).unwrap_or_default().to_string(),
            not_interested_filter: NotInterestedFilter::from_param(params.get(NOT_INTERESTED_PARAM)),
        }
    }

    pub fn to_query(&self) -> QueryParams {
        let mut params = QueryParams::new();
        self.apply_to(&mut params);
        params
    }

    /// Writes this state into `params`, leaving unrelated keys where they
    /// are.
    pub fn apply_to(&self, params: &mut QueryParams) {
        params.set(FILTER_PARAM, self.watch_status.as_str());
        params.set_or_remove(TAGS_PARAM, join_list(&self.selected_tags));
        if self.selected_tags.len() > 1 {
            params.set(TAG_MODE_PARAM, self.tag_mode.as_str());
        } else {
            params.remove(TAG_MODE_PARAM);
        }
        if self.search_query.is_empty() {
            params.remove(SEARCH_PARAM);
        } else {
            params.set(SEARCH_PARAM, self.search_query.as_str());
        }
        params.set(NOT_INTERESTED_PARAM, self.not_interested_filter.as_str());
    }

    /// Tag mode as it is sent to the backend: only meaningful with several
    /// tags.
    pub fn effective_tag_mode(&self) -> Option<TagMode> {
        (self.selected_tags.len() > 1).then_some(self.tag_mode)
    }

    /// Filter equality with tags compared as a set.
    pub fn matches(&self, other: &Self) -> bool {
        self.watch_status == other.watch_status
            && self.effective_tag_mode() == other.effective_tag_mode()
            && self.search_query == other.search_query
            && self.not_interested_filter == other.not_interested_filter
            && same_tag_set(&self.selected_tags, &other.selected_tags)
    }
}

/// URL-backed controller for the video list filters. Nothing is cached: every
/// getter re-reads the navigator, and every mutator pushes a single entry.
#[derive(Debug, Clone)]
pub struct VideoFilters<N> {
    navigator: N,
}

impl<N: Navigator> VideoFilters<N> {
    pub fn new(navigator: N) -> Self {
        Self { navigator }
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    pub fn state(&self) -> VideoFilterState {
        VideoFilterState::from_query(&self.navigator.query())
    }

    pub fn watch_status(&self) -> WatchStatus {
        self.state().watch_status
    }

    pub fn selected_tags(&self) -> Vec<String> {
        self.state().selected_tags
    }

    pub fn tag_mode(&self) -> TagMode {
        self.state().tag_mode
    }

    pub fn search_query(&self) -> String {
        self.state().search_query
    }

    pub fn not_interested_filter(&self) -> NotInterestedFilter {
        self.state().not_interested_filter
    }

    pub fn update_filter(&self, watch_status: WatchStatus) {
        self.commit(|state| state.watch_status = watch_status);
    }

    pub fn update_tags(&self, tags: Vec<String>) {
        self.commit(|state| state.selected_tags = tags);
    }

    pub fn update_tag_mode(&self, tag_mode: TagMode) {
        self.commit(|state| state.tag_mode = tag_mode);
    }

    pub fn update_search_query(&self, query: &str) {
        self.commit(|state| state.search_query = query.to_string());
    }

    pub fn update_not_interested_filter(&self, filter: NotInterestedFilter) {
        self.commit(|state| state.not_interested_filter = filter);
    }

    /// Returns `false` without navigating when the tag is already selected.
    pub fn add_tag(&self, tag: &str) -> bool {
        let current = self.state();
        if current.selected_tags.iter().any(|existing| existing == tag) {
            return false;
        }
        let mut tags = current.selected_tags;
        tags.push(tag.to_string());
        self.update_tags(tags);
        true
    }

    /// Returns `false` without navigating when the tag is not selected.
    pub fn remove_tag(&self, tag: &str) -> bool {
        let current = self.state();
        if !current.selected_tags.iter().any(|existing| existing == tag) {
            return false;
        }
        let tags = current
            .selected_tags
            .into_iter()
            .filter(|existing| existing != tag)
            .collect();
        self.update_tags(tags);
        true
    }

    /// Resets every filter to its default in one navigation.
    pub fn clear_filters(&self) {
        self.commit(|state| *state = VideoFilterState::default());
    }

    pub fn are_filters_equal(&self, other: &VideoFilterState) -> bool {
        self.state().matches(other)
    }

    fn commit(&self, change: impl FnOnce(&mut VideoFilterState)) {
        let mut params = self.navigator.query();
        let mut state = VideoFilterState::from_query(&params);
        change(&mut state);
        state.apply_to(&mut params);
        push_query(&self.navigator, &params);
    }
}
