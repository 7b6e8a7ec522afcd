//! Registration API client over HTTP.
//!
//! | operation          | request                                   |
//! |--------------------|-------------------------------------------|
//! | register node      | `DELETE resource/nodes/{id}`, `POST resource`, `POST health/nodes/{id}` |
//! | register resource  | `POST resource` with `{"type", "data"}`   |
//! | delete resource    | `DELETE resource/{type}s/{id}`            |
//! | heartbeat          | `POST health/nodes/{id}`                  |
//!
//! Transport errors, timeouts and 5xx responses are `Unreachable`. A 404 on
//! heartbeat is `NodeExpired`, on resource registration `NodeNotRegistered`,
//! and on delete a success. Any other 4xx is `Rejected`.
//!
//! Every request is bounded by the engine's request timeout. With
//! [`AuthConfig`] set, requests carry a bearer token; a granted token the
//! registry answers 401 to is replaced and the request sent once more.

use crate::auth::{AuthConfig, TokenSource};
use crate::client::{heartbeat_interval_in_range, CallKind, RegistrationClient};
use crate::config::EngineConfig;
use crate::endpoint::RegistryEndpoint;
use crate::error::{EngineError, RegistryError, RegistryResult};
use async_trait::async_trait;
use nodefacade_types::{Resource, ResourceId, ResourceType};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// HTTP-only client settings. Timing comes from [`EngineConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRegistryConfig {
    /// Authorization for registries behind an authorization server.
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    /// Seconds.
    heartbeat_interval: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// [`RegistrationClient`] speaking the NMOS Registration API.
pub struct HttpRegistrationClient {
    client: Client,
    default_heartbeat_interval: Duration,
    tokens: Option<TokenSource>,
}

impl HttpRegistrationClient {
    pub fn new(engine: &EngineConfig, config: HttpRegistryConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(engine.request_timeout())
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            default_heartbeat_interval: engine.default_heartbeat_interval(),
            tokens: config.auth.map(TokenSource::new),
        })
    }

    fn refreshes_tokens(&self) -> bool {
        self.tokens.as_ref().is_some_and(TokenSource::can_refresh)
    }

    /// Sends the request built by `build`, authorized if configured.
    async fn send(
        &self,
        operation: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> RegistryResult<Response> {
        let response = self.send_once(operation, &build).await?;
        if response.status() == StatusCode::UNAUTHORIZED && self.refreshes_tokens() {
            warn!("Registry refused our access token for {}; requesting a new one", operation);
            if let Some(tokens) = &self.tokens {
                tokens.invalidate();
            }
            return self.send_once(operation, &build).await;
        }
        Ok(response)
    }

    async fn send_once(
        &self,
        operation: &str,
        build: &impl Fn() -> RequestBuilder,
    ) -> RegistryResult<Response> {
        let mut request = build();
        if let Some(tokens) = &self.tokens {
            request = request.bearer_auth(tokens.token(&self.client).await?);
        }
        request
            .send()
            .await
            .map_err(|e| unreachable_error(operation, e))
    }

    async fn post_resource(
        &self,
        endpoint: &RegistryEndpoint,
        resource: &Resource,
    ) -> RegistryResult<()> {
        let body = json!({
            "type": resource.resource_type.as_str(),
            "data": resource.registration_payload(),
        });

        let url = format!("{}/resource", endpoint.api_root());
        let response = self
            .send("register", || self.client.post(&url).json(&body))
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                debug!(
                    "Registered {} {} (version {})",
                    resource.resource_type, resource.id, resource.version
                );
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(RegistryError::NodeNotRegistered),
            _ => Err(failure(response).await),
        }
    }

    async fn delete(
        &self,
        endpoint: &RegistryEndpoint,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> RegistryResult<()> {
        let url = format!(
            "{}/resource/{}/{}",
            endpoint.api_root(),
            resource_type.plural(),
            id
        );
        let response = self.send("delete", || self.client.delete(&url)).await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!("Deleted {} {}", resource_type, id);
            return Ok(());
        }
        Err(failure(response).await)
    }

    async fn post_health(
        &self,
        endpoint: &RegistryEndpoint,
        node_id: ResourceId,
    ) -> RegistryResult<Duration> {
        let url = format!("{}/health/nodes/{}", endpoint.api_root(), node_id);
        let response = self.send("heartbeat", || self.client.post(&url)).await?;

        match response.status() {
            status if status.is_success() => {
                let reported = response
                    .json::<HealthResponse>()
                    .await
                    .ok()
                    .and_then(|h| h.heartbeat_interval);
                Ok(self.heartbeat_interval(reported))
            }
            StatusCode::NOT_FOUND => Err(RegistryError::NodeExpired),
            _ => Err(failure(response).await),
        }
    }
}

impl HttpRegistrationClient {
    /// The reported interval, or the default when it is absent or outside
    /// the range we follow.
    fn heartbeat_interval(&self, reported_secs: Option<f64>) -> Duration {
        let Some(secs) = reported_secs else {
            return self.default_heartbeat_interval;
        };
        match Duration::try_from_secs_f64(secs) {
            Ok(interval) if heartbeat_interval_in_range(interval) => interval,
            _ => {
                warn!(
                    "Ignoring heartbeat interval of {}s from registry, using {:?}",
                    secs, self.default_heartbeat_interval
                );
                self.default_heartbeat_interval
            }
        }
    }
}

fn unreachable_error(operation: &str, e: reqwest::Error) -> RegistryError {
    RegistryError::Unreachable(format!("{operation} failed: {e}"))
}

/// Maps a non-success response that has no operation-specific meaning.
async fn failure(response: Response) -> RegistryError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if status.is_client_error() {
        let reason = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|b| b.error)
            .unwrap_or(text);
        RegistryError::Rejected {
            status: Some(status.as_u16()),
            reason,
        }
    } else {
        RegistryError::Unreachable(format!("registry returned {status}: {text}"))
    }
}

#[async_trait]
impl RegistrationClient for HttpRegistrationClient {
    async fn register_node(
        &self,
        endpoint: &RegistryEndpoint,
        node: &Resource,
    ) -> RegistryResult<Duration> {
        // A leftover registration from an earlier run would keep stale
        // children alive; start from nothing.
        match self.delete(endpoint, ResourceType::Node, node.id).await {
            Ok(()) => {}
            Err(RegistryError::Rejected { status, reason }) => {
                warn!(
                    "Ignoring refused delete of stale node {} ({:?}): {}",
                    node.id, status, reason
                );
            }
            Err(e) => return Err(e),
        }

        self.post_resource(endpoint, node).await?;
        let interval = self.post_health(endpoint, node.id).await?;
        info!("Node {} registered with {}", node.id, endpoint.href);
        Ok(interval)
    }

    async fn register_resource(
        &self,
        endpoint: &RegistryEndpoint,
        resource: &Resource,
    ) -> RegistryResult<()> {
        self.post_resource(endpoint, resource).await
    }

    async fn delete_resource(
        &self,
        endpoint: &RegistryEndpoint,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> RegistryResult<()> {
        self.delete(endpoint, resource_type, id).await
    }

    async fn heartbeat(
        &self,
        endpoint: &RegistryEndpoint,
        node_id: ResourceId,
    ) -> RegistryResult<Duration> {
        self.post_health(endpoint, node_id).await
    }

    fn round_trips(&self, kind: CallKind) -> u32 {
        let requests = match kind {
            CallKind::RegisterNode => 3,
            _ => 1,
        };
        if self.refreshes_tokens() {
            // One token grant up front, then a grant and a resend per refused request.
            requests * 3 + 1
        } else {
            requests
        }
    }
}
