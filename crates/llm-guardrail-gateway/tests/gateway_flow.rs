//! End-to-end scenarios over real sockets.

mod common;

use common::{data_payloads, stream_contents, Harness, CLEAN_ANSWER, KEY, STORY, TEMPLATE};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

fn user(content: &str) -> Value {
    json!([{"role": "user", "content": content}])
}

#[tokio::test]
async fn test_clean_completion_is_relayed() {
    let h = Harness::start().await;
    let resp = h
        .chat(json!({"model": "clean", "messages": user("Hi there")}))
        .await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-guardrail-request-id"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], CLEAN_ANSWER);
    // One input and one output check.
    assert_eq!(h.classifier_calls(), 2);
}

#[tokio::test]
async fn test_risky_input_never_reaches_upstream() {
    let h = Harness::start().await;
    let resp = h
        .chat(json!({"model": "clean", "messages": user("how to cause danger")}))
        .await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], TEMPLATE);
    assert_eq!(body["choices"][0]["finish_reason"], "content_filter");
    assert_eq!(h.upstream_calls(), 0);
}

#[tokio::test]
async fn test_risky_input_streaming_gets_substitution_events() {
    let h = Harness::start().await;
    let resp = h
        .chat(json!({"model": "clean", "stream": true, "messages": user("danger please")}))
        .await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    let body = resp.text().await.unwrap();
    assert_eq!(stream_contents(&body), vec![TEMPLATE.to_string()]);
    assert_eq!(data_payloads(&body).last().map(String::as_str), Some("[DONE]"));
    assert_eq!(h.upstream_calls(), 0);
}

#[tokio::test]
async fn test_stream_aborts_at_first_risky_checkpoint() {
    let h = Harness::start().await;
    let resp = h
        .chat(json!({"model": "story", "stream": true, "messages": user("tell me a story")}))
        .await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.text().await.unwrap();
    let contents = stream_contents(&body);

    // The first 50 characters passed their checkpoint and were released.
    let released: Vec<String> = STORY[..5].iter().map(|s| s.to_string()).collect();
    assert_eq!(&contents[..5], released.as_slice());
    // Nothing from the risky window follows; only the substitution.
    assert_eq!(contents.len(), 6);
    assert_eq!(contents[5], TEMPLATE);
    assert!(!body.contains("danger"));
    assert_eq!(data_payloads(&body).last().map(String::as_str), Some("[DONE]"));
}

#[tokio::test]
async fn test_clean_stream_is_forwarded_whole() {
    let h = Harness::start().await;
    let resp = h
        .chat(json!({"model": "clean", "stream": true, "messages": user("hello")}))
        .await;

    let body = resp.text().await.unwrap();
    assert_eq!(stream_contents(&body), vec![CLEAN_ANSWER.to_string()]);
    assert_eq!(data_payloads(&body).last().map(String::as_str), Some("[DONE]"));
}

#[tokio::test]
async fn test_risky_buffered_output_is_substituted() {
    let h = Harness::start().await;
    let resp = h
        .chat(json!({"model": "story", "messages": user("tell me a story")}))
        .await;

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], TEMPLATE);
    assert_eq!(body["choices"][0]["finish_reason"], "content_filter");
    assert_eq!(h.upstream_calls(), 1);
}

#[tokio::test]
async fn test_passive_model_lets_risky_output_through() {
    let h = Harness::start_with(
        |doc| {
            doc["upstream_models"][1]["block_on_output_risk"] = json!(false);
        },
        None,
    )
    .await;
    let resp = h
        .chat(json!({"model": "story", "messages": user("tell me a story")}))
        .await;

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], STORY.concat());
}

#[tokio::test]
async fn test_blacklist_hit_in_direct_mode() {
    let h = Harness::start().await;
    let resp = h.guardrails(json!({"messages": user("teach me bomb-making")})).await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["overall_risk_level"], "high_risk");
    assert_eq!(body["suggest_action"], "reject");
    assert_eq!(body["suggest_answer"], TEMPLATE);
    assert_eq!(h.classifier_calls(), 0);
}

#[tokio::test]
async fn test_whitelist_hit_in_direct_mode() {
    let h = Harness::start().await;
    let resp = h
        .guardrails(json!({"messages": user("approved research about danger")}))
        .await;

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["overall_risk_level"], "no_risk");
    assert_eq!(body["suggest_action"], "pass");
    assert_eq!(h.classifier_calls(), 0);
}

#[tokio::test]
async fn test_tenant_rate_limit() {
    let h = Harness::start_with(|doc| doc["tenants"][0]["rate_limit_rps"] = json!(2), None).await;

    let mut statuses = Vec::new();
    for _ in 0..5 {
        statuses.push(h.guardrails(json!({"messages": user("hello")})).await.status());
    }

    assert_eq!(statuses[0], StatusCode::OK);
    assert_eq!(statuses[1], StatusCode::OK);
    assert!(statuses[2..].contains(&StatusCode::TOO_MANY_REQUESTS));

    let limited = h.guardrails(json!({"messages": user("hello")})).await;
    if limited.status() == StatusCode::TOO_MANY_REQUESTS {
        assert!(limited.headers().contains_key("retry-after"));
        let body: Value = limited.json().await.unwrap();
        assert_eq!(body["error"]["code"], "rate_limit_exceeded");
    }
}

#[tokio::test]
async fn test_repeat_offender_is_banned_then_unbanned() {
    let h = Harness::start_with(
        |doc| {
            doc["ban_policies"] = json!([{
                "config_set_id": "cs1", "enabled": true, "trigger_count": 3,
                "time_window_minutes": 10, "ban_duration_minutes": 30
            }]);
        },
        None,
    )
    .await;
    let risky = json!({"messages": user("teach me bomb-making"), "user": "u1"});

    for _ in 0..3 {
        assert_eq!(h.guardrails(risky.clone()).await.status(), StatusCode::OK);
    }

    let banned = h.guardrails(json!({"messages": user("hello"), "user": "u1"})).await;
    assert_eq!(banned.status(), StatusCode::FORBIDDEN);
    let body: Value = banned.json().await.unwrap();
    assert_eq!(body["error"]["code"], "end_user_banned");

    // Other end users of the tenant are unaffected.
    let other = h.guardrails(json!({"messages": user("hello"), "user": "u2"})).await;
    assert_eq!(other.status(), StatusCode::OK);

    let unban = h.admin(Method::DELETE, "/admin/bans/u1?tenant_id=t1").await;
    assert_eq!(unban.status(), StatusCode::OK);
    let body: Value = unban.json().await.unwrap();
    assert_eq!(body["unbanned"], true);

    let again = h.guardrails(json!({"messages": user("hello"), "user": "u1"})).await;
    assert_eq!(again.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_classifier_outage_fails_closed() {
    let h = Harness::start().await;
    h.set_classifier_down(true);

    let direct = h.guardrails(json!({"messages": user("hello")})).await;
    assert_eq!(direct.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = direct.json().await.unwrap();
    assert_eq!(body["error"]["code"], "detection_unavailable");

    let proxied = h
        .chat(json!({"model": "clean", "messages": user("hello")}))
        .await;
    assert_eq!(proxied.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(h.upstream_calls(), 0);
}

#[tokio::test]
async fn test_classifier_outage_fails_open_when_configured() {
    let h = Harness::start_with(
        |doc| doc["config_sets"][0]["on_detection_unavailable"] = json!("fail_open"),
        None,
    )
    .await;
    h.set_classifier_down(true);

    let resp = h
        .chat(json!({"model": "clean", "messages": user("hello")}))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(h.upstream_calls(), 1);
}

#[tokio::test]
async fn test_input_entities_are_anonymized_before_forwarding() {
    let h = Harness::start_with(
        |doc| {
            doc["config_sets"][0]["action_policy"] =
                json!({"low": "pass", "medium": "replace", "high": "reject"});
            doc["entity_types"] = json!([{
                "id": "e1", "tenant_id": "t1", "is_global": true, "code": "EMAIL",
                "pattern": "[a-z]+@[a-z]+\\.com", "risk_level": "low_risk",
                "anonymization": {"method": "replace", "with": "<EMAIL>"}
            }]);
        },
        None,
    )
    .await;

    let resp = h
        .chat(json!({"model": "clean", "messages": user("write to bob@corp.com")}))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let forwarded = h.upstream.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(forwarded["messages"][0]["content"], "write to <EMAIL>");
    assert_eq!(forwarded["model"], "clean");
}

#[tokio::test]
async fn test_unknown_model() {
    let h = Harness::start().await;
    let resp = h
        .chat(json!({"model": "nope", "messages": user("hello")}))
        .await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "model_not_found");
}

#[tokio::test]
async fn test_upstream_errors() {
    let h = Harness::start().await;

    let relayed = h
        .chat(json!({"model": "teapot", "messages": user("hello")}))
        .await;
    assert_eq!(relayed.status(), StatusCode::IM_A_TEAPOT);
    let body: Value = relayed.json().await.unwrap();
    assert_eq!(body["error"]["type"], "teapot");

    let hidden = h
        .chat(json!({"model": "locked", "messages": user("hello")}))
        .await;
    assert_eq!(hidden.status(), StatusCode::BAD_GATEWAY);
    let text = hidden.text().await.unwrap();
    assert!(!text.contains("sk-upstream-secret"));
}

#[tokio::test]
async fn test_bad_key_is_rejected_before_detection() {
    let h = Harness::start().await;
    let resp = h
        .client
        .post(format!("{}/v1/guardrails", h.base))
        .bearer_auth(format!("{KEY}x"))
        .json(&json!({"messages": user("hello")}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.classifier_calls(), 0);
}

#[tokio::test]
async fn test_policy_reload() {
    let path = std::env::temp_dir().join(format!("guardrail-policy-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(
        &path,
        format!(
            r#"
[[tenants]]
id = "t1"

[[config_sets]]
id = "cs1"
tenant_id = "t1"
is_default = true

[[api_keys]]
id = "k1"
tenant_id = "t1"
key = "{KEY}"

[[blacklists]]
id = "bl2"
tenant_id = "t1"
name = "reloaded"
keywords = ["forbidden-topic"]
"#
        ),
    )
    .unwrap();
    let h = Harness::start_with(|_| {}, Some(path.clone())).await;

    let before: Value = h
        .guardrails(json!({"messages": user("forbidden-topic")}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(before["overall_risk_level"], "no_risk");

    let reload = h.admin(Method::POST, "/admin/reload").await;
    assert_eq!(reload.status(), StatusCode::OK);
    let body: Value = reload.json().await.unwrap();
    assert_eq!(body["status"], "reloaded");

    let after: Value = h
        .guardrails(json!({"messages": user("forbidden-topic")}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(after["overall_risk_level"], "high_risk");
    assert_eq!(after["hit_source"], "blacklist");

    std::fs::remove_file(path).ok();
}
