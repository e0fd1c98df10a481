//! Client side of the space policy service.
//!
//! The policy service maps a tenant space to a port-pool group and keeps a
//! registry of the endpoints each space exposes. Both calls are advisory:
//! group resolution falls back to group 0 with a named reason, and endpoint
//! registration runs as a detached task whose outcome nobody waits for.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{ContainerError, Result};

/// Group used whenever the policy service cannot name one.
pub const FALLBACK_GROUP: usize = 0;

/// Why a space was not resolved to a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The container has no space assigned.
    NoSpace,
    /// No policy service is configured.
    NotConfigured,
    /// The service could not be reached or answered with an error.
    Unavailable(String),
    /// The service answered with something other than a group index.
    Unparseable(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpace => f.write_str("container has no space"),
            Self::NotConfigured => f.write_str("no policy service configured"),
            Self::Unavailable(msg) => write!(f, "policy service unavailable: {msg}"),
            Self::Unparseable(body) => write!(f, "unparseable group {body:?}"),
        }
    }
}

/// Outcome of resolving a space to a port-pool group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupResolution {
    Resolved(usize),
    Fallback(FallbackReason),
}

impl GroupResolution {
    /// Returns the group to allocate from.
    #[must_use]
    pub const fn group(&self) -> usize {
        match self {
            Self::Resolved(group) => *group,
            Self::Fallback(_) => FALLBACK_GROUP,
        }
    }

    /// Returns the fallback reason, if resolution fell back.
    #[must_use]
    pub const fn fallback_reason(&self) -> Option<&FallbackReason> {
        match self {
            Self::Resolved(_) => None,
            Self::Fallback(reason) => Some(reason),
        }
    }
}

/// Space policy service.
#[async_trait]
pub trait SpacePolicy: Send + Sync {
    /// Maps `space` to a port-pool group.
    async fn resolve_group(&self, space: &str) -> GroupResolution;

    /// Records that `endpoint` (`ip:port`) is reachable for `space`.
    async fn register_endpoint(&self, space: &str, endpoint: &str)
        -> std::result::Result<(), String>;
}

/// Policy used when no service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSpacePolicy;

#[async_trait]
impl SpacePolicy for NoopSpacePolicy {
    async fn resolve_group(&self, _space: &str) -> GroupResolution {
        GroupResolution::Fallback(FallbackReason::NotConfigured)
    }

    async fn register_endpoint(
        &self,
        _space: &str,
        _endpoint: &str,
    ) -> std::result::Result<(), String> {
        Ok(())
    }
}

#[derive(Serialize)]
struct EndpointRegistration<'a> {
    space: &'a str,
    endpoint: &'a str,
}

/// HTTP client for the policy service.
///
/// `GET <url>?space=<id>` answers with a plain-text group index;
/// `POST <url>` with `{"space", "endpoint"}` registers an endpoint.
#[derive(Debug, Clone)]
pub struct HttpSpacePolicy {
    client: reqwest::Client,
    url: String,
}

impl HttpSpacePolicy {
    /// Creates a client for `http://<host>:<port><path>`.
    ///
    /// `timeout` bounds every request.
    pub fn new(host: &str, port: u16, path: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ContainerError::config(format!("policy client: {e}")))?;
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        Ok(Self {
            client,
            url: format!("http://{host}:{port}{path}"),
        })
    }

    /// Returns the service URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SpacePolicy for HttpSpacePolicy {
    async fn resolve_group(&self, space: &str) -> GroupResolution {
        let response = self
            .client
            .get(&self.url)
            .query(&[("space", space)])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        let body = match response {
            Ok(response) => response.text().await,
            Err(e) => Err(e),
        };

        match body {
            Ok(body) => match body.trim().parse::<usize>() {
                Ok(group) => GroupResolution::Resolved(group),
                Err(_) => GroupResolution::Fallback(FallbackReason::Unparseable(body)),
            },
            Err(e) => GroupResolution::Fallback(FallbackReason::Unavailable(e.to_string())),
        }
    }

    async fn register_endpoint(
        &self,
        space: &str,
        endpoint: &str,
    ) -> std::result::Result<(), String> {
        self.client
            .post(&self.url)
            .json(&EndpointRegistration { space, endpoint })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map(drop)
            .map_err(|e| e.to_string())
    }
}

/// Fire-and-forget endpoint registration.
#[derive(Clone)]
pub struct EndpointNotifier {
    policy: Arc<dyn SpacePolicy>,
}

impl EndpointNotifier {
    #[must_use]
    pub fn new(policy: Arc<dyn SpacePolicy>) -> Self {
        Self { policy }
    }

    /// Registers `endpoint` for `space` on a detached task.
    ///
    /// Returns immediately. The registration is attempted once; failures
    /// are logged and dropped. Returns `None` when called outside a tokio
    /// runtime, in which case nothing is sent.
    pub fn notify(&self, space: String, endpoint: String) -> Option<JoinHandle<()>> {
        let Ok(handle) = Handle::try_current() else {
            debug!(%space, %endpoint, "no runtime, endpoint not registered");
            return None;
        };

        let policy = Arc::clone(&self.policy);
        Some(handle.spawn(async move {
            match policy.register_endpoint(&space, &endpoint).await {
                Ok(()) => debug!(%space, %endpoint, "endpoint registered"),
                Err(error) => debug!(%space, %endpoint, %error, "endpoint registration failed"),
            }
        }))
    }
}
