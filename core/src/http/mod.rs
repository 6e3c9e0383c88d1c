pub mod client;

pub use client::{ExchangeStats, MediaServerClient, PersonRefresher};

use std::collections::HashMap;

use serde::Deserialize;
use url::Url;

use crate::error::RefreshError;

const API_SUFFIX: &str = "/emby";

/// Entry of the `/Users` listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserRecord {
    pub id: String,
}

/// Entry of the `/Persons` listing.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Person {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image_tags: Option<HashMap<String, String>>,
}

impl Person {
    /// A person without any image tag still needs its images fetched.
    pub fn needs_refresh(&self) -> bool {
        self.image_tags.as_ref().map_or(true, |tags| tags.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonsResponse {
    #[serde(rename = "Items", default)]
    pub items: Vec<Person>,
}

/// Server base URLs derived from the user-supplied address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUrls {
    /// Base for the API calls, always ending in `/emby`.
    pub api: Url,
    /// Base for the per-item refresh calls, without the `/emby` suffix.
    pub root: Url,
}

impl ServerUrls {
    pub fn parse(raw: &str) -> Result<Self, RefreshError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let api = if trimmed.ends_with(API_SUFFIX) {
            trimmed.to_string()
        } else {
            format!("{}{}", trimmed, API_SUFFIX)
        };
        let root = &api[..api.len() - API_SUFFIX.len()];

        Ok(Self {
            api: parse_base(raw, &api)?,
            root: parse_base(raw, root)?,
        })
    }
}

fn parse_base(raw: &str, candidate: &str) -> Result<Url, RefreshError> {
    let url = Url::parse(candidate).map_err(|e| RefreshError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(RefreshError::InvalidUrl {
            url: raw.to_string(),
            reason: "expected an http(s) server address".to_string(),
        });
    }
    Ok(url)
}

/// Appends path segments to `base`, percent-encoding each one.
pub fn join_path(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}
