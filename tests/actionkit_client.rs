//! ActionKit client against an in-process stub of the HTTP API

mod common;

use std::time::Duration;

use common::{ActionKitStub, PROJECT_ID, PUBLIC_KEY, StubBehavior, config};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use mcp_actionkit::Error;
use mcp_actionkit::actionkit::{ActionKitClient, ActionProvider};
use mcp_actionkit::signer::{Claims, Identity, SignedAssertion, TokenSigner};
use pretty_assertions::assert_eq;
use serde_json::json;

fn assertion(user: &str) -> SignedAssertion {
    TokenSigner::from_pem(common::PRIVATE_KEY)
        .unwrap()
        .sign(&Identity::new(user).unwrap())
        .unwrap()
}

#[tokio::test]
async fn fetch_sends_bearer_assertion_and_parses_catalog() {
    let stub = ActionKitStub::spawn().await;
    let client = ActionKitClient::new(&config(&stub.base_url).actionkit).unwrap();

    let catalog = client.fetch_actions(&assertion("a@b.com")).await.unwrap();
    let names: Vec<&str> = catalog.actions().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["SLACK_SEND_MESSAGE", "SLACK_LIST_CHANNELS"]);

    let requests = stub.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].project, PROJECT_ID);
    assert_eq!(requests[0].query, None);

    let token = requests[0].bearer().unwrap();
    let key = DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap();
    let claims = jsonwebtoken::decode::<Claims>(token, &key, &Validation::new(Algorithm::RS256))
        .unwrap()
        .claims;
    assert_eq!(claims.sub, "a@b.com");
    assert_eq!(claims.exp - claims.iat, 604_800);
}

#[tokio::test]
async fn integration_filter_is_sent_as_query() {
    let stub = ActionKitStub::spawn().await;
    let mut cfg = config(&stub.base_url);
    cfg.actionkit.integrations = vec!["slack".to_string(), "jira".to_string()];
    let client = ActionKitClient::new(&cfg.actionkit).unwrap();

    client.fetch_actions(&assertion("a@b.com")).await.unwrap();
    assert_eq!(
        stub.requests()[0].query.as_deref(),
        Some("integrations=slack%2Cjira")
    );
}

#[tokio::test]
async fn rejected_catalog_request_carries_status() {
    let stub = ActionKitStub::spawn_with(StubBehavior {
        catalog_status: 401,
        catalog_body: json!("invalid signature"),
        ..StubBehavior::default()
    })
    .await;
    let client = ActionKitClient::new(&config(&stub.base_url).actionkit).unwrap();

    let err = client.fetch_actions(&assertion("a@b.com")).await.unwrap_err();
    match err {
        Error::CatalogFetch { status, message } => {
            assert_eq!(status, Some(401));
            assert_eq!(message, "invalid signature");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn malformed_catalog_is_a_catalog_error() {
    let stub = ActionKitStub::spawn_with(StubBehavior {
        catalog_body: json!({"unexpected": true}),
        ..StubBehavior::default()
    })
    .await;
    let client = ActionKitClient::new(&config(&stub.base_url).actionkit).unwrap();

    assert!(matches!(
        client.fetch_actions(&assertion("a@b.com")).await,
        Err(Error::CatalogFetch { .. })
    ));
}

#[tokio::test]
async fn invoke_posts_action_and_parameters() {
    let stub = ActionKitStub::spawn().await;
    let client = ActionKitClient::new(&config(&stub.base_url).actionkit).unwrap();

    let result = client
        .invoke(
            "SLACK_SEND_MESSAGE",
            json!({"channel": "#general", "text": "hi"}),
            &assertion("a@b.com"),
        )
        .await
        .unwrap();
    assert_eq!(result, json!({"ok": true, "ts": "1712345678.000100"}));

    let posts = stub.requests_with_method("POST");
    assert_eq!(posts.len(), 1);
    assert_eq!(
        posts[0].body,
        Some(json!({
            "action": "SLACK_SEND_MESSAGE",
            "parameters": {"channel": "#general", "text": "hi"}
        }))
    );
    assert!(posts[0].bearer().is_some());
}

#[tokio::test]
async fn failed_invocation_truncates_body() {
    let stub = ActionKitStub::spawn_with(StubBehavior {
        invoke_status: 400,
        invoke_body: json!("x".repeat(2_000)),
        ..StubBehavior::default()
    })
    .await;
    let client = ActionKitClient::new(&config(&stub.base_url).actionkit).unwrap();

    let err = client
        .invoke("SLACK_SEND_MESSAGE", json!({}), &assertion("a@b.com"))
        .await
        .unwrap_err();
    match err {
        Error::Invocation { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body.len(), 500);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn slow_provider_times_out_as_transport_error() {
    let stub = ActionKitStub::spawn_with(StubBehavior {
        delay: Duration::from_secs(2),
        ..StubBehavior::default()
    })
    .await;
    let mut cfg = config(&stub.base_url);
    cfg.actionkit.timeout = Duration::from_millis(100);
    let client = ActionKitClient::new(&cfg.actionkit).unwrap();

    let err = client
        .invoke("SLACK_SEND_MESSAGE", json!({}), &assertion("a@b.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(ref m) if m.contains("timed out")), "{err}");
}

#[tokio::test]
async fn unreachable_provider_is_transport_error() {
    // Bind then drop to get a port with nothing listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ActionKitClient::new(&config(&format!("http://{addr}")).actionkit).unwrap();
    assert!(matches!(
        client.fetch_actions(&assertion("a@b.com")).await,
        Err(Error::Transport(_))
    ));
}
