#![forbid(unsafe_code)]

//! Filters for the subscribed and available channel lists.
//!
//! Both lists share one query string, so every key carries a one-letter
//! context prefix: `ss`/`as` (search), `sts`/`ats` (tags), `stm`/`atm` (tag
//! mode) and `sp`/`ap` (page).

use serde::{Deserialize, Serialize};

use super::{ChannelTagMode, same_tag_set};
use crate::navigation::{Navigator, push_query};
use crate::query::{QueryParams, join_list, split_list};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelContext {
    Subscribed,
    Available,
}

impl ChannelContext {
    pub fn prefix(self) -> char {
        match self {
            Self::Subscribed => 's',
            Self::Available => 'a',
        }
    }

    pub fn search_key(self) -> String {
        format!("{}s", self.prefix())
    }

    pub fn tags_key(self) -> String {
        format!("{}ts", self.prefix())
    }

    pub fn tag_mode_key(self) -> String {
        format!("{}tm", self.prefix())
    }

    pub fn page_key(self) -> String {
        format!("{}p", self.prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelFilterState {
    pub search: String,
    pub selected_tags: Vec<String>,
    pub tag_mode: ChannelTagMode,
    pub page: u32,
}

impl Default for ChannelFilterState {
    fn default() -> Self {
        Self {
            search: String::new(),
            selected_tags: Vec::new(),
            tag_mode: ChannelTagMode::default(),
            page: 1,
        }
    }
}

impl ChannelFilterState {
    pub fn from_query(params: &QueryParams, context: ChannelContext) -> Self {
        let selected_tags = split_list(params.get(&context.tags_key()));
        let tag_mode = if selected_tags.len() > 1 {
            ChannelTagMode::from_param(params.get(&context.tag_mode_key()))
        } else {
            ChannelTagMode::default()
        };
        let page = params
            .get(&context.page_key())
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|page| *page >= 1)
            .unwrap_or(1);
        Self {
            search: params
                .get(&context.search_key())
                .unwrap_or_default()
                .to_string(),
            selected_tags,
            tag_mode,
            page,
        }
    }

    /// Rewrites only this context's keys. Keys that became default are
    /// deleted, changed keys keep their position, new keys are appended.
    pub fn apply_to(&self, params: &mut QueryParams, context: ChannelContext) {
        params.set_or_remove(
            &context.search_key(),
            (!self.search.is_empty()).then(|| self.search.clone()),
        );
        params.set_or_remove(&context.tags_key(), join_list(&self.selected_tags));
        params.set_or_remove(
            &context.tag_mode_key(),
            (self.selected_tags.len() > 1).then(|| self.tag_mode.as_str().to_string()),
        );
        params.set_or_remove(
            &context.page_key(),
            (self.page > 1).then(|| self.page.to_string()),
        );
    }

    pub fn matches(&self, other: &Self) -> bool {
        self.search == other.search
            && self.page == other.page
            && self.tag_mode == other.tag_mode
            && same_tag_set(&self.selected_tags, &other.selected_tags)
    }
}

/// URL-backed controller for one channel list.
#[derive(Debug, Clone)]
pub struct ChannelFilters<N> {
    navigator: N,
    context: ChannelContext,
}

impl<N: Navigator> ChannelFilters<N> {
    pub fn new(navigator: N, context: ChannelContext) -> Self {
        Self { navigator, context }
    }

    pub fn context(&self) -> ChannelContext {
        self.context
    }

    pub fn state(&self) -> ChannelFilterState {
        ChannelFilterState::from_query(&self.navigator.query(), self.context)
    }

    pub fn search(&self) -> String {
        self.state().search
    }

    pub fn selected_tags(&self) -> Vec<String> {
        self.state().selected_tags
    }

    pub fn tag_mode(&self) -> ChannelTagMode {
        self.state().tag_mode
    }

    pub fn page(&self) -> u32 {
        self.state().page
    }

    pub fn update_search(&self, search: &str) {
        self.commit(|state| {
            state.search = search.to_string();
            state.page = 1;
        });
    }

    pub fn update_tags(&self, tags: Vec<String>) {
        self.commit(|state| {
            state.selected_tags = tags;
            state.page = 1;
        });
    }

    pub fn update_tag_mode(&self, tag_mode: ChannelTagMode) {
        self.commit(|state| {
            state.tag_mode = tag_mode;
            state.page = 1;
        });
    }

    pub fn update_page(&self, page: u32) {
        self.commit(|state| state.page = page.max(1));
    }

    pub fn add_tag(&self, tag: &str) -> bool {
        let current = self.selected_tags();
        if current.iter().any(|existing| existing == tag) {
            return false;
        }
        let mut tags = current;
        tags.push(tag.to_string());
        self.update_tags(tags);
        true
    }

    pub fn remove_tag(&self, tag: &str) -> bool {
        let current = self.selected_tags();
        if !current.iter().any(|existing| existing == tag) {
            return false;
        }
        self.update_tags(current.into_iter().filter(|existing| existing != tag).collect());
        true
    }

    pub fn clear_filters(&self) {
        self.commit(|state| *state = ChannelFilterState::default());
    }

    fn commit(&self, change: impl FnOnce(&mut ChannelFilterState)) {
        let mut params = self.navigator.query();
        let mut state = ChannelFilterState::from_query(&params, self.context);
        change(&mut state);
        state.apply_to(&mut params, self.context);
        push_query(&self.navigator, &params);
    }
}
