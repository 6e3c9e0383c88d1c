use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, ClientBuilder, Response};

use super::{join_path, PersonsResponse, ServerUrls, UserRecord};
use crate::core::requester::{ItemFetcher, RefreshResponse};
use crate::core::speed::{classify, Throughput};
use crate::core::WorkItem;
use crate::error::{FetchError, RefreshError};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PERSONS_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timing of one exchange, shown next to the probe and person fetch notices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExchangeStats {
    pub elapsed: Duration,
    pub bytes: u64,
}

impl ExchangeStats {
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }

    pub fn throughput(&self) -> Throughput {
        classify(self.bytes, self.elapsed_ms())
    }
}

/// Emby / Jellyfin API client. One instance, and so one connection pool, is
/// shared by every worker.
pub struct MediaServerClient {
    inner: Client,
    urls: ServerUrls,
    api_key: String,
    request_timeout: Duration,
}

impl MediaServerClient {
    pub fn new(server_url: &str, api_key: &str, request_timeout: Duration) -> Result<Self, RefreshError> {
        let urls = ServerUrls::parse(server_url)?;
        let inner = ClientBuilder::new()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(RefreshError::Client)?;

        Ok(Self {
            inner,
            urls,
            api_key: api_key.to_string(),
            request_timeout,
        })
    }

    pub fn urls(&self) -> &ServerUrls {
        &self.urls
    }

    pub async fn user_ids(&self) -> Result<Vec<String>, RefreshError> {
        let users: Vec<UserRecord> = self
            .inner
            .get(join_path(&self.urls.api, &["Users"]))
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(RefreshError::UserDiscovery)?
            .json()
            .await
            .map_err(RefreshError::UserDiscovery)?;

        Ok(users.into_iter().map(|u| u.id).filter(|id| !id.is_empty()).collect())
    }

    /// The first user id the server reports; refresh calls run as this user.
    pub async fn first_user_id(&self) -> Result<String, RefreshError> {
        self.user_ids()
            .await?
            .into_iter()
            .next()
            .ok_or(RefreshError::NoUserId)
    }

    /// Checks that the server answers its public info endpoint with a 200.
    pub async fn probe(&self) -> Result<ExchangeStats, RefreshError> {
        let start = Instant::now();
        let response = self
            .inner
            .get(join_path(&self.urls.api, &["System", "Info", "Public"]))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(RefreshError::Connection)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(RefreshError::Connection)?;
        let stats = ExchangeStats { elapsed: start.elapsed(), bytes: body.len() as u64 };
        debug!("probe answered {} in {:.2}ms", status, stats.elapsed_ms());

        if status != 200 {
            return Err(RefreshError::Unreachable { status });
        }
        Ok(stats)
    }

    pub async fn fetch_persons(&self) -> Result<(PersonsResponse, ExchangeStats), RefreshError> {
        let start = Instant::now();
        let body = self
            .inner
            .get(join_path(&self.urls.api, &["Persons"]))
            .query(&[("api_key", self.api_key.as_str()), ("enableImages", "false")])
            .timeout(PERSONS_TIMEOUT)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(RefreshError::PersonFetch)?
            .bytes()
            .await
            .map_err(RefreshError::PersonFetch)?;
        let stats = ExchangeStats { elapsed: start.elapsed(), bytes: body.len() as u64 };

        let persons: PersonsResponse = serde_json::from_slice(&body)?;
        Ok((persons, stats))
    }

    /// Binds the client to a user, producing the fetcher used by the workers.
    pub fn refresher(self: &Arc<Self>, user_id: impl Into<String>) -> PersonRefresher {
        PersonRefresher {
            client: Arc::clone(self),
            user_id: user_id.into(),
        }
    }
}

/// Per-item refresh call: `GET {root}/Users/{user}/Items/{person}`.
pub struct PersonRefresher {
    client: Arc<MediaServerClient>,
    user_id: String,
}

impl PersonRefresher {
    pub fn item_url(&self, person_id: &str) -> url::Url {
        join_path(
            &self.client.urls.root,
            &["Users", &self.user_id, "Items", person_id],
        )
    }
}

#[async_trait]
impl ItemFetcher for PersonRefresher {
    async fn refresh(&self, item: &WorkItem) -> Result<RefreshResponse, FetchError> {
        if item.id.is_empty() {
            return Err(FetchError::Unexpected(anyhow::anyhow!(
                "person '{}' has no id",
                item.name
            )));
        }

        let response = self
            .client
            .inner
            .get(self.item_url(&item.id))
            .query(&[("api_key", self.client.api_key.as_str())])
            .timeout(self.client.request_timeout)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(RefreshResponse { status, bytes: body.len() as u64 })
    }
}
