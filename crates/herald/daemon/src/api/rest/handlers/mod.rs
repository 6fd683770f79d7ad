//! API request handlers

mod drafts;
mod health;
mod memories;
mod settings;
mod styles;
mod system;
mod threads;
mod workers;

pub use drafts::*;
pub use health::*;
pub use memories::*;
pub use settings::*;
pub use styles::*;
pub use system::*;
pub use threads::*;
pub use workers::*;

use axum::http::HeaderMap;
use herald_storage::QueryWindow;
use serde::Deserialize;

/// Header naming the operator behind a mutation
pub const ACTOR_HEADER: &str = "x-herald-actor";

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

pub(crate) fn actor(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn window(limit: Option<usize>, offset: Option<usize>) -> QueryWindow {
    QueryWindow {
        limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE),
        offset: offset.unwrap_or(0),
    }
}

/// Paging parameters shared by list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}
