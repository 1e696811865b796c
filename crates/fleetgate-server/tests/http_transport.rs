use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use assert_json_diff::assert_json_eq;
use fleetgate_core::{BackendNode, RpcError, RpcOptions, RpcTransport};
use fleetgate_server::{HttpRpcTransport, RpcFanout};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport(routes: &[(&str, &MockServer)]) -> HttpRpcTransport {
    HttpRpcTransport::new(
        routes
            .iter()
            .map(|(key, server)| (key.to_string(), format!("{}/rpc", server.uri())))
            .collect::<HashMap<_, _>>(),
    )
}

fn opts() -> RpcOptions {
    RpcOptions::with_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn test_posts_json_rpc_envelope() {
    let node = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(body_partial_json(json!({
            "jsonrpc": "2.0",
            "method": "listThings",
            "params": { "limit": 5 }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": [{ "id": "t1" }] })),
        )
        .expect(1)
        .mount(&node)
        .await;

    let result = transport(&[("aa", &node)])
        .request("aa", "listThings", &json!({ "limit": 5 }), opts())
        .await
        .unwrap();
    assert_json_eq!(result, json!([{ "id": "t1" }]));
}

#[tokio::test]
async fn test_error_member_rejects_with_its_message() {
    let node = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32000, "message": "ERR_THING_NOT_FOUND" }
        })))
        .mount(&node)
        .await;

    let err = transport(&[("aa", &node)])
        .request("aa", "getThingConf", &json!({}), opts())
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::remote("ERR_THING_NOT_FOUND"));
}

#[tokio::test]
async fn test_http_failure_and_timeout() {
    let node = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "broken" })))
        .respond_with(ResponseTemplate::new(503))
        .mount(&node)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "slow" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "result": true }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&node)
        .await;
    let transport = transport(&[("aa", &node)]);

    let err = transport
        .request("aa", "broken", &json!({}), opts())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Transport(_)));

    let err = transport
        .request(
            "aa",
            "slow",
            &json!({}),
            RpcOptions::with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::Timeout);
}

#[tokio::test]
async fn test_unknown_node_makes_no_request() {
    let node = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": 1 })))
        .expect(0)
        .mount(&node)
        .await;

    let err = transport(&[("aa", &node)])
        .request("zz", "listThings", &json!({}), opts())
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::UnknownNode("zz".into()));
}

#[tokio::test]
async fn test_fanout_over_http_isolates_failed_node() {
    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [{ "id": 1 }] })))
        .mount(&healthy)
        .await;
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": { "message": "timeout" } })))
        .mount(&failing)
        .await;

    let fanout = RpcFanout::new(
        Arc::new(transport(&[("n1", &healthy), ("n2", &failing)])),
        vec![BackendNode::new("n1"), BackendNode::new("n2")],
        Duration::from_secs(2),
        2,
    );

    let results = fanout.fanout_each("listThings", &json!({})).await;
    assert_json_eq!(json!(results), json!([[{ "id": 1 }], { "error": "timeout" }]));

    let err = fanout.fanout_map("listThings", &json!({})).await.unwrap_err();
    assert_eq!(err, RpcError::remote("timeout"));
}
