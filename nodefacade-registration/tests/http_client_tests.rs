use nodefacade_registration::{
    AuthConfig, CallKind, EngineConfig, HttpRegistrationClient, HttpRegistryConfig,
    LifecycleEngine, RegistrationClient, RegistryEndpoint, RegistryError, RegistryLocator,
};
use nodefacade_store::ResourceStore;
use nodefacade_types::{Resource, ResourceId, ResourceType};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{
    basic_auth, body_json, body_string_contains, header, method, path, path_regex,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ROOT: &str = "/x-nmos/registration/v1.3";

fn engine_config() -> EngineConfig {
    EngineConfig {
        request_timeout_ms: 200,
        ..EngineConfig::default()
    }
}

fn client() -> HttpRegistrationClient {
    HttpRegistrationClient::new(&engine_config(), HttpRegistryConfig::default()).unwrap()
}

fn client_with_auth(auth: AuthConfig) -> HttpRegistrationClient {
    HttpRegistrationClient::new(&engine_config(), HttpRegistryConfig { auth: Some(auth) }).unwrap()
}

fn client_credentials(server: &MockServer) -> AuthConfig {
    AuthConfig::ClientCredentials {
        token_url: format!("{}/token", server.uri()),
        client_id: "nodefacade".into(),
        client_secret: "secret".into(),
        scope: Some("registration".into()),
    }
}

fn endpoint(server: &MockServer) -> RegistryEndpoint {
    RegistryEndpoint::new(server.uri(), 10)
}

fn node() -> Resource {
    let mut node = Resource::node(ResourceId::new(), json!({"label": "camera-1"}));
    node.version = 1;
    node
}

// ── Node registration ────────────────────────────────────────────

#[tokio::test]
async fn register_node_clears_stale_then_posts_and_heartbeats() {
    let server = MockServer::start().await;
    let node = node();

    Mock::given(method("DELETE"))
        .and(path(format!("{ROOT}/resource/nodes/{}", node.id)))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{ROOT}/resource")))
        .and(body_json(json!({
            "type": "node",
            "data": {"label": "camera-1", "id": node.id.to_string()}
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{ROOT}/health/nodes/{}", node.id)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"health": "1", "heartbeat_interval": 8})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let interval = client().register_node(&endpoint(&server), &node).await.unwrap();
    assert_eq!(interval, Duration::from_secs(8));
}

#[tokio::test]
async fn register_node_refused_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{ROOT}/resource")))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"code": 400, "error": "schema mismatch", "debug": null})),
        )
        .mount(&server)
        .await;

    let err = client()
        .register_node(&endpoint(&server), &node())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::Rejected {
            status: Some(400),
            reason: "schema mismatch".into()
        }
    );
}

#[tokio::test]
async fn register_node_stops_when_registry_errors() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let err = client()
        .register_node(&endpoint(&server), &node())
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

// ── Resources ────────────────────────────────────────────────────

#[tokio::test]
async fn register_resource_posts_type_and_data() {
    let server = MockServer::start().await;
    let device = Resource::child(
        ResourceType::Device,
        ResourceId::new(),
        ResourceId::new(),
        json!({"label": "dev"}),
    );

    Mock::given(method("POST"))
        .and(path(format!("{ROOT}/resource")))
        .and(body_json(json!({
            "type": "device",
            "data": {"label": "dev", "id": device.id.to_string()}
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client()
        .register_resource(&endpoint(&server), &device)
        .await
        .unwrap();
}

#[tokio::test]
async fn register_resource_without_node_is_not_registered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client()
        .register_resource(&endpoint(&server), &node())
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::NodeNotRegistered);
}

#[tokio::test]
async fn conflict_is_rejected_with_plain_text_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(409).set_body_string("version conflict"))
        .mount(&server)
        .await;

    let err = client()
        .register_resource(&endpoint(&server), &node())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::Rejected {
            status: Some(409),
            reason: "version conflict".into()
        }
    );
}

#[tokio::test]
async fn server_error_is_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client()
        .register_resource(&endpoint(&server), &node())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Unreachable(_)));
}

#[tokio::test]
async fn delete_uses_plural_path_and_tolerates_404() {
    let server = MockServer::start().await;
    let id = ResourceId::new();
    Mock::given(method("DELETE"))
        .and(path(format!("{ROOT}/resource/senders/{id}")))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let client = client();
    let endpoint = endpoint(&server);
    client
        .delete_resource(&endpoint, ResourceType::Sender, id)
        .await
        .unwrap();
    client
        .delete_resource(&endpoint, ResourceType::Sender, id)
        .await
        .unwrap();
}

// ── Heartbeat ────────────────────────────────────────────────────

#[tokio::test]
async fn heartbeat_reports_registry_interval() {
    let server = MockServer::start().await;
    let id = ResourceId::new();
    Mock::given(method("POST"))
        .and(path(format!("{ROOT}/health/nodes/{id}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"health": "1", "heartbeat_interval": 12})),
        )
        .mount(&server)
        .await;

    let interval = client().heartbeat(&endpoint(&server), id).await.unwrap();
    assert_eq!(interval, Duration::from_secs(12));
}

#[tokio::test]
async fn heartbeat_without_interval_uses_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"health": "1"})))
        .mount(&server)
        .await;

    let interval = client()
        .heartbeat(&endpoint(&server), ResourceId::new())
        .await
        .unwrap();
    assert_eq!(interval, Duration::from_secs(5));
}

async fn heartbeat_with_reported_interval(reported: serde_json::Value) -> Duration {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"health": "1", "heartbeat_interval": reported})),
        )
        .mount(&server)
        .await;
    client()
        .heartbeat(&endpoint(&server), ResourceId::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn huge_heartbeat_interval_falls_back_to_default() {
    assert_eq!(heartbeat_with_reported_interval(json!(1e20)).await, Duration::from_secs(5));
    assert_eq!(heartbeat_with_reported_interval(json!(86_400)).await, Duration::from_secs(5));
}

#[tokio::test]
async fn tiny_or_negative_heartbeat_interval_falls_back_to_default() {
    assert_eq!(heartbeat_with_reported_interval(json!(1e-9)).await, Duration::from_secs(5));
    assert_eq!(heartbeat_with_reported_interval(json!(0)).await, Duration::from_secs(5));
    assert_eq!(heartbeat_with_reported_interval(json!(-3)).await, Duration::from_secs(5));
}

#[tokio::test]
async fn fractional_heartbeat_interval_is_kept() {
    assert_eq!(
        heartbeat_with_reported_interval(json!(2.5)).await,
        Duration::from_millis(2_500)
    );
}

#[tokio::test]
async fn heartbeat_for_unknown_node_is_expired() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client()
        .heartbeat(&endpoint(&server), ResourceId::new())
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::NodeExpired);
    assert!(err.is_session_lost());
}

#[tokio::test]
async fn slow_registry_is_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let err = client()
        .heartbeat(&endpoint(&server), ResourceId::new())
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn closed_port_is_unreachable() {
    // Nothing listens on the discard port.
    let endpoint = RegistryEndpoint::new("http://127.0.0.1:9", 10);
    let err = client()
        .heartbeat(&endpoint, ResourceId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Unreachable(_)));
}

// ── Authorization ────────────────────────────────────────────────

#[tokio::test]
async fn bearer_token_is_sent_with_every_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer fixed-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"health": "1"})))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_with_auth(AuthConfig::Bearer {
        token: "fixed-token".into(),
    });
    let endpoint = endpoint(&server);
    client.heartbeat(&endpoint, ResourceId::new()).await.unwrap();
    client.heartbeat(&endpoint, ResourceId::new()).await.unwrap();
}

#[tokio::test]
async fn refused_fixed_token_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "invalid token"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with_auth(AuthConfig::Bearer {
        token: "stale".into(),
    });
    let err = client
        .register_resource(&endpoint(&server), &node())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::Rejected {
            status: Some(401),
            reason: "invalid token".into()
        }
    );
}

#[tokio::test]
async fn granted_token_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(basic_auth("nodefacade", "secret"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("scope=registration"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "t1", "token_type": "Bearer", "expires_in": 3600})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(format!("^{ROOT}/health/nodes/")))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"health": "1"})))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_with_auth(client_credentials(&server));
    let endpoint = endpoint(&server);
    client.heartbeat(&endpoint, ResourceId::new()).await.unwrap();
    client.heartbeat(&endpoint, ResourceId::new()).await.unwrap();
}

#[tokio::test]
async fn refused_granted_token_is_renewed_and_request_resent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access_token": "t1", "expires_in": 3600})),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access_token": "t2", "expires_in": 3600})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{ROOT}/resource")))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{ROOT}/resource")))
        .and(header("authorization", "Bearer t2"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with_auth(client_credentials(&server));
    client
        .register_resource(&endpoint(&server), &node())
        .await
        .unwrap();
}

#[tokio::test]
async fn token_endpoint_failure_is_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_client"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{ROOT}/resource")))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_with_auth(client_credentials(&server));
    let err = client
        .register_resource(&endpoint(&server), &node())
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn call_budgets_cover_token_round_trips() {
    let server = MockServer::start().await;
    let plain = client();
    assert_eq!(plain.round_trips(CallKind::RegisterNode), 3);
    assert_eq!(plain.round_trips(CallKind::Heartbeat), 1);

    let bearer = client_with_auth(AuthConfig::Bearer { token: "t".into() });
    assert_eq!(bearer.round_trips(CallKind::RegisterNode), 3);

    let granted = client_with_auth(client_credentials(&server));
    assert_eq!(granted.round_trips(CallKind::RegisterNode), 10);
    assert_eq!(granted.round_trips(CallKind::RegisterResource), 4);
}

// ── Engine over HTTP ─────────────────────────────────────────────

#[tokio::test]
async fn slow_but_responsive_registry_is_registered() {
    let server = MockServer::start().await;
    let delay = Duration::from_millis(400);
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(404).set_delay(delay))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{ROOT}/resource")))
        .respond_with(ResponseTemplate::new(201).set_delay(delay))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(format!("^{ROOT}/health/nodes/")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"health": "1"}))
                .set_delay(delay),
        )
        .mount(&server)
        .await;

    let store = Arc::new(ResourceStore::new());
    let node = Resource::node(ResourceId::new(), json!({"label": "camera-1"}));
    let device = Resource::child(ResourceType::Device, ResourceId::new(), node.id, json!({}));
    store.put(node).unwrap();
    store.put(device).unwrap();

    // Every request takes 400 ms against a 1 s request timeout.
    let config = EngineConfig::default();
    let client =
        Arc::new(HttpRegistrationClient::new(&config, HttpRegistryConfig::default()).unwrap());
    let locator = RegistryLocator::new_static(vec![endpoint(&server)]);
    let engine = LifecycleEngine::new(store, locator, client, config)
        .unwrap()
        .spawn();

    let status = tokio::time::timeout(Duration::from_secs(10), engine.wait_for(|s| s.is_healthy()))
        .await
        .expect("registry never accepted the node")
        .unwrap();
    assert!(status.registered);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.last_error, None);

    engine.shutdown().await.unwrap();
}
