#![forbid(unsafe_code)]

//! State core of the NewTube gallery frontend: filter <-> URL sync, the
//! login redirect guard, scroll position persistence and infinite
//! pagination with scroll restoration.

pub mod api;
pub mod config;
pub mod events;
pub mod filters;
pub mod logging;
pub mod navigation;
pub mod pagination;
pub mod query;
pub mod return_url;
pub mod scroll;
pub mod session;
pub mod storage;
pub mod trigger;
