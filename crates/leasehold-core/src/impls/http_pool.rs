//! HTTP client for the resource broker.
//!
//! Every call is a single `POST` with query parameters; retries and
//! per-call deadlines are owned by `LeaseClient`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::domain::{Lease, PoolKind};
use crate::ports::{PoolError, PoolService};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Resource as returned by the broker's `acquire` endpoint.
#[derive(Debug, Deserialize)]
struct ResourceResponse {
    name: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    owner: Option<String>,
    #[serde(default, alias = "expirationDate", alias = "expiration-date")]
    expiration_date: Option<DateTime<Utc>>,
}

/// Outcome of an `acquire` response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcquireStatus {
    Granted,
    NoneFree,
}

fn classify_acquire(status: StatusCode) -> Result<AcquireStatus, PoolError> {
    match status {
        StatusCode::OK => Ok(AcquireStatus::Granted),
        StatusCode::NOT_FOUND => Ok(AcquireStatus::NoneFree),
        s if s.is_server_error() => Err(PoolError::Transient(format!("acquire returned {s}"))),
        s => Err(PoolError::Fatal(format!("acquire returned {s}"))),
    }
}

fn classify_update(status: StatusCode) -> Result<(), PoolError> {
    match status {
        StatusCode::OK => Ok(()),
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::NOT_FOUND
        | StatusCode::CONFLICT => Err(PoolError::LeaseLost(format!("update returned {status}"))),
        s if s.is_server_error() => Err(PoolError::Transient(format!("update returned {s}"))),
        s => Err(PoolError::Fatal(format!("update returned {s}"))),
    }
}

fn classify_release(status: StatusCode) -> Result<(), PoolError> {
    match status {
        StatusCode::OK => Ok(()),
        s if s.is_server_error() => Err(PoolError::Transient(format!("release returned {s}"))),
        s => Err(PoolError::Fatal(format!("release returned {s}"))),
    }
}

fn transport(err: reqwest::Error) -> PoolError {
    PoolError::Transient(err.to_string())
}

/// HTTP implementation of [`PoolService`].
#[derive(Debug, Clone)]
pub struct HttpPoolService {
    client: Client,
    base_url: String,
}

impl HttpPoolService {
    /// Create a client for the broker at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

#[async_trait]
impl PoolService for HttpPoolService {
    async fn try_acquire(&self, kind: &PoolKind, owner: &str) -> Result<Option<Lease>, PoolError> {
        let response = self
            .client
            .post(self.endpoint("acquire"))
            .query(&[
                ("type", kind.as_str()),
                ("state", "free"),
                ("dest", "busy"),
                ("owner", owner),
            ])
            .send()
            .await
            .map_err(transport)?;

        if classify_acquire(response.status())? == AcquireStatus::NoneFree {
            debug!(kind = %kind, "no free resource");
            return Ok(None);
        }

        let resource: ResourceResponse = response
            .json()
            .await
            .map_err(|e| PoolError::Transient(format!("invalid acquire response: {e}")))?;

        let lease_kind = resource.kind.map(PoolKind::new).unwrap_or_else(|| kind.clone());
        let lease_owner = resource.owner.unwrap_or_else(|| owner.to_string());
        let mut lease = Lease::new(lease_kind, resource.name, lease_owner);
        if let Some(expires_at) = resource.expiration_date {
            lease = lease.with_expiry(expires_at);
        }
        Ok(Some(lease))
    }

    async fn heartbeat(&self, lease: &Lease) -> Result<(), PoolError> {
        let response = self
            .client
            .post(self.endpoint("update"))
            .query(&[
                ("name", lease.name.as_str()),
                ("owner", lease.owner.as_str()),
                ("state", "busy"),
            ])
            .send()
            .await
            .map_err(transport)?;

        classify_update(response.status())
    }

    async fn release(&self, lease: &Lease) -> Result<(), PoolError> {
        let response = self
            .client
            .post(self.endpoint("release"))
            .query(&[
                ("name", lease.name.as_str()),
                ("owner", lease.owner.as_str()),
                ("dest", "dirty"),
            ])
            .send()
            .await
            .map_err(transport)?;

        classify_release(response.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(StatusCode::OK, Ok(AcquireStatus::Granted))]
    #[case(StatusCode::NOT_FOUND, Ok(AcquireStatus::NoneFree))]
    #[case(StatusCode::SERVICE_UNAVAILABLE, Err("transient"))]
    #[case(StatusCode::BAD_GATEWAY, Err("transient"))]
    #[case(StatusCode::UNAUTHORIZED, Err("fatal"))]
    #[case(StatusCode::BAD_REQUEST, Err("fatal"))]
    fn acquire_statuses(#[case] status: StatusCode, #[case] expected: Result<AcquireStatus, &str>) {
        let actual = classify_acquire(status).map_err(|e| kind_of(&e));
        assert_eq!(actual, expected);
    }

    #[rstest]
    #[case(StatusCode::OK, Ok(()))]
    #[case(StatusCode::UNAUTHORIZED, Err("lost"))]
    #[case(StatusCode::FORBIDDEN, Err("lost"))]
    #[case(StatusCode::NOT_FOUND, Err("lost"))]
    #[case(StatusCode::CONFLICT, Err("lost"))]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, Err("transient"))]
    #[case(StatusCode::BAD_REQUEST, Err("fatal"))]
    fn update_statuses(#[case] status: StatusCode, #[case] expected: Result<(), &str>) {
        let actual = classify_update(status).map_err(|e| kind_of(&e));
        assert_eq!(actual, expected);
    }

    #[rstest]
    #[case(StatusCode::OK, Ok(()))]
    #[case(StatusCode::GATEWAY_TIMEOUT, Err("transient"))]
    #[case(StatusCode::UNAUTHORIZED, Err("fatal"))]
    fn release_statuses(#[case] status: StatusCode, #[case] expected: Result<(), &str>) {
        let actual = classify_release(status).map_err(|e| kind_of(&e));
        assert_eq!(actual, expected);
    }

    fn kind_of(err: &PoolError) -> &'static str {
        match err {
            PoolError::Transient(_) => "transient",
            PoolError::Fatal(_) => "fatal",
            PoolError::LeaseLost(_) => "lost",
        }
    }

    #[test]
    fn resource_response_accepts_broker_field_names() {
        let resource: ResourceResponse = serde_json::from_str(
            r#"{
                "type": "gce-project",
                "name": "proj-a",
                "state": "busy",
                "owner": "leasehold-abc",
                "expirationDate": "2026-01-01T00:00:00Z"
            }"#,
        )
        .unwrap();

        assert_eq!(resource.name, "proj-a");
        assert_eq!(resource.kind.as_deref(), Some("gce-project"));
        assert_eq!(resource.owner.as_deref(), Some("leasehold-abc"));
        assert!(resource.expiration_date.is_some());
    }

    #[test]
    fn base_url_is_normalized() {
        let pool = HttpPoolService::new("http://pool.local/").unwrap();
        assert_eq!(pool.base_url(), "http://pool.local");
        assert_eq!(pool.endpoint("acquire"), "http://pool.local/acquire");
    }

    #[tokio::test]
    async fn unreachable_pool_is_transient() {
        let pool = HttpPoolService::new("http://127.0.0.1:9").unwrap();

        let err = pool
            .try_acquire(&PoolKind::default(), "leasehold-test")
            .await
            .unwrap_err();

        assert!(matches!(err, PoolError::Transient(_)));
    }
}
