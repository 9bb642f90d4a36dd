//! In-process gateway with a scripted upstream model and classifier.

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use llm_guardrail_core::{
    GuardrailCore, HttpClassifier, InMemoryConfigStore, KeyHasher, PolicyDocument,
};
use llm_guardrail_gateway::forwarder::Forwarder;
use llm_guardrail_gateway::settings::UpstreamSettings;
use llm_guardrail_gateway::state::{AdminGuard, PolicySource};
use llm_guardrail_gateway::{create_router, AppState};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const KEY: &str = "sk-guard-integration-0000000000";
pub const PEPPER: &str = "integration-pepper";
pub const ADMIN_TOKEN: &str = "integration-admin";
pub const TEMPLATE: &str = "I can't discuss that.";
pub const CLEAN_ANSWER: &str = "Hello! How can I help you today?";

/// Ten-character pieces streamed by the `story` model. The sixth piece
/// carries the word the classifier flags.
pub const STORY: [&str; 12] = [
    "Once upon ", "a time the", "re was a q", "uiet villa", "ge by the ",
    "danger zon", "e where no", "body dared", " to walk a", "t night and",
    " the end.", " Goodbye. ",
];

#[derive(Default)]
pub struct UpstreamState {
    pub calls: AtomicUsize,
    pub last_body: Mutex<Option<Value>>,
}

#[derive(Default)]
pub struct ClassifierState {
    pub calls: AtomicUsize,
    pub down: AtomicBool,
}

pub struct Harness {
    pub base: String,
    pub client: reqwest::Client,
    pub upstream: Arc<UpstreamState>,
    pub classifier: Arc<ClassifierState>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(|_| {}, None).await
    }

    /// `customize` edits the policy document before it is loaded.
    pub async fn start_with(customize: impl FnOnce(&mut Value), policy_file: Option<PathBuf>) -> Self {
        let upstream = Arc::new(UpstreamState::default());
        let classifier = Arc::new(ClassifierState::default());
        let upstream_base = serve(upstream_app(upstream.clone())).await;
        let classifier_base = serve(classifier_app(classifier.clone())).await;

        let mut document = policy(&upstream_base);
        customize(&mut document);
        let document: PolicyDocument = serde_json::from_value(document).unwrap();

        let hasher = KeyHasher::new(PEPPER).unwrap();
        let store = Arc::new(InMemoryConfigStore::new(document, hasher.clone()).unwrap());
        let core = GuardrailCore::builder()
            .with_pepper(PEPPER)
            .with_config_store(store.clone())
            .with_classifier(Arc::new(
                HttpClassifier::new(&classifier_base, None, Duration::from_secs(2)).unwrap(),
            ))
            .build()
            .unwrap();
        let forwarder = Forwarder::new(&UpstreamSettings {
            retry_backoff_ms: 10,
            ..Default::default()
        })
        .unwrap();

        let state = AppState::new(Arc::new(core), Arc::new(forwarder))
            .with_admin(AdminGuard::new(hasher, ADMIN_TOKEN).unwrap())
            .with_policy(PolicySource {
                store,
                path: policy_file,
            });
        let base = serve(create_router(state)).await;

        Self {
            base,
            client: reqwest::Client::new(),
            upstream,
            classifier,
        }
    }

    pub fn upstream_calls(&self) -> usize {
        self.upstream.calls.load(Ordering::SeqCst)
    }

    pub fn classifier_calls(&self) -> usize {
        self.classifier.calls.load(Ordering::SeqCst)
    }

    pub fn set_classifier_down(&self, down: bool) {
        self.classifier.down.store(down, Ordering::SeqCst);
    }

    pub async fn guardrails(&self, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}/v1/guardrails", self.base))
            .bearer_auth(KEY)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn chat(&self, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}/v1/gateway/chat/completions", self.base))
            .bearer_auth(KEY)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn admin(&self, method: reqwest::Method, path: &str) -> reqwest::Response {
        self.client
            .request(method, format!("{}{}", self.base, path))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .unwrap()
    }
}

/// One tenant, one default template, a blacklist, a whitelist and the
/// scripted upstream models.
pub fn policy(upstream_base: &str) -> Value {
    json!({
        "tenants": [{"id": "t1", "name": "Acme"}],
        "config_sets": [{"id": "cs1", "tenant_id": "t1", "is_default": true}],
        "api_keys": [{"id": "k1", "tenant_id": "t1", "key": KEY}],
        "blacklists": [{"id": "bl1", "tenant_id": "t1", "name": "weapons",
                        "keywords": ["bomb-making"]}],
        "whitelists": [{"id": "wl1", "tenant_id": "t1", "name": "research",
                        "keywords": ["approved research"]}],
        "response_templates": [{"id": "rt1", "config_set_id": "cs1", "content": TEMPLATE}],
        "upstream_models": [
            {"id": "m1", "tenant_id": "t1", "model_name": "clean",
             "base_url": upstream_base, "stream_chunk_size": 50},
            {"id": "m2", "tenant_id": "t1", "model_name": "story",
             "base_url": upstream_base, "stream_chunk_size": 50},
            {"id": "m3", "tenant_id": "t1", "model_name": "teapot",
             "base_url": upstream_base},
            {"id": "m4", "tenant_id": "t1", "model_name": "locked",
             "base_url": upstream_base}
        ]
    })
}

pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn upstream_app(state: Arc<UpstreamState>) -> Router {
    Router::new()
        .route("/chat/completions", post(upstream_completions))
        .with_state(state)
}

async fn upstream_completions(State(state): State<Arc<UpstreamState>>, Json(body): Json<Value>) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);
    *state.last_body.lock().unwrap() = Some(body.clone());

    let model = body["model"].as_str().unwrap_or_default().to_string();
    let stream = body["stream"].as_bool().unwrap_or(false);
    let pieces: Vec<&str> = match model.as_str() {
        "teapot" => {
            return (
                StatusCode::IM_A_TEAPOT,
                Json(json!({"error": {"message": "short and stout", "type": "teapot"}})),
            )
                .into_response()
        }
        "locked" => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": {"message": "invalid upstream key sk-upstream-secret"}})),
            )
                .into_response()
        }
        "story" => STORY.to_vec(),
        _ => vec![CLEAN_ANSWER],
    };

    if !stream {
        return Json(json!({
            "id": "chatcmpl-upstream",
            "object": "chat.completion",
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": pieces.concat()},
                "finish_reason": "stop"
            }]
        }))
        .into_response();
    }

    let mut frames = String::new();
    for piece in pieces {
        let chunk = json!({
            "id": "chatcmpl-upstream",
            "object": "chat.completion.chunk",
            "model": model,
            "choices": [{"index": 0, "delta": {"content": piece}, "finish_reason": null}]
        });
        frames.push_str(&format!("data: {chunk}\n\n"));
    }
    frames.push_str("data: [DONE]\n\n");
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from(frames))
        .unwrap()
}

fn classifier_app(state: Arc<ClassifierState>) -> Router {
    Router::new()
        .route("/v1/classify", post(classify))
        .with_state(state)
}

async fn classify(State(state): State<Arc<ClassifierState>>, Json(body): Json<Value>) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);
    if state.down.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let text = body["text"].as_str().unwrap_or_default();
    if text.contains("danger") {
        Json(json!({
            "compliance": {"risk_level": "high_risk", "categories": ["S5"], "confidence": 0.99}
        }))
        .into_response()
    } else {
        Json(json!({})).into_response()
    }
}

/// Content deltas of an SSE body, excluding `[DONE]`.
pub fn stream_contents(body: &str) -> Vec<String> {
    data_payloads(body)
        .into_iter()
        .filter(|p| p != "[DONE]")
        .filter_map(|p| serde_json::from_str::<Value>(&p).ok())
        .filter_map(|v| v["choices"][0]["delta"]["content"].as_str().map(str::to_string))
        .collect()
}

pub fn data_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}
