use super::*;
use crate::Result;
use crate::chat::prompts::FALLBACK_MESSAGE;
use crate::config::Settings;
use crate::embeddings::Embedder;
use crate::llm::{ChatDelta, ChatMessage, ChatModel, DeltaStream, ToolSpec};
use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;

struct FixedModel(Vec<&'static str>);

#[async_trait]
impl ChatModel for FixedModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        Ok(String::new())
    }

    async fn stream_chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<DeltaStream> {
        let deltas: Vec<Result<ChatDelta>> = self
            .0
            .iter()
            .map(|text| Ok(ChatDelta::Content((*text).to_string())))
            .collect();
        Ok(Box::pin(futures::stream::iter(deltas)))
    }
}

struct UnitEmbedder;

#[async_trait]
impl Embedder for UnitEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

struct TestResponse {
    status: u16,
    content_type: String,
    body: Option<String>,
}

/// Start the API on an ephemeral port, returning its base URL
async fn spawn_app(answer: Vec<&'static str>, create_db: bool) -> (String, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut settings = Settings::default();
    settings.openai.api_key = "sk-test".to_string();
    settings.base_dir = temp_dir.path().to_path_buf();
    settings.data.vector_db_path = "vectors".into();
    if create_db {
        std::fs::create_dir_all(settings.vector_db_path()).expect("should create db dir");
    }

    let factory = ChatEngineFactory::new(
        Arc::new(settings),
        Arc::new(UnitEmbedder),
        Arc::new(FixedModel(answer)),
    );
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("should bind listener");
    let address = listener.local_addr().expect("should have address");

    tokio::spawn(async move {
        server::serve(listener, AppState::new(Arc::new(factory)), "/api")
            .await
            .expect("server should run");
    });

    (format!("http://{address}"), temp_dir)
}

async fn get(url: String) -> TestResponse {
    tokio::task::spawn_blocking(move || {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        let Ok(mut response) = agent.get(&url).call() else {
            return TestResponse {
                status: 0,
                content_type: String::new(),
                body: None,
            };
        };
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        TestResponse {
            status: response.status().as_u16(),
            content_type,
            body: response.body_mut().read_to_string().ok(),
        }
    })
    .await
    .expect("request task should not panic")
}

/// Data payloads of every event in an SSE body
fn sse_data(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter(|event| !event.trim().is_empty())
        .map(|event| {
            event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|data| data.strip_prefix(' ').unwrap_or(data))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn health_is_alive() {
    let (base_url, _temp_dir) = spawn_app(Vec::new(), false).await;

    for path in ["/api/health/", "/api/health"] {
        let response = get(format!("{base_url}{path}")).await;
        assert_eq!(response.status, 200);
        assert!(response.content_type.starts_with("application/json"));

        let body: Value =
            serde_json::from_str(&response.body.expect("body should be readable")).expect("json");
        assert_eq!(body, serde_json::json!({"status": "alive"}));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn conversation_streams_fragments_in_order() {
    let (base_url, _temp_dir) =
        spawn_app(vec!["스마트스토어는 ", "네이버의 ", "쇼핑 플랫폼입니다."], true).await;

    let url = url::Url::parse_with_params(
        &format!("{base_url}/api/conversation/message"),
        &[("user_message", "스마트스토어가 뭐야?")],
    )
    .expect("valid url");
    let response = get(url.to_string()).await;
    assert_eq!(response.status, 200);
    assert!(response.content_type.starts_with("text/event-stream"));

    let data = sse_data(&response.body.expect("body should be readable"));
    assert_eq!(data, vec!["스마트스토어는 ", "네이버의 ", "쇼핑 플랫폼입니다."]);
}

#[tokio::test(flavor = "multi_thread")]
async fn blank_answer_streams_fallback() {
    let (base_url, _temp_dir) = spawn_app(vec!["  "], true).await;

    let response = get(format!("{base_url}/api/conversation/message?user_message=hello")).await;
    assert_eq!(response.status, 200);

    let data = sse_data(&response.body.expect("body should be readable"));
    assert_eq!(data.last().map(String::as_str), Some(FALLBACK_MESSAGE));
    assert_eq!(
        data.iter().filter(|chunk| !chunk.trim().is_empty()).count(),
        1
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_user_message_is_rejected() {
    let (base_url, _temp_dir) = spawn_app(Vec::new(), true).await;

    let response = get(format!("{base_url}/api/conversation/message")).await;
    assert_eq!(response.status, 400);
}

#[tokio::test(flavor = "multi_thread")]
async fn routes_live_under_prefix() {
    let (base_url, _temp_dir) = spawn_app(Vec::new(), true).await;

    let response = get(format!("{base_url}/health/")).await;
    assert_eq!(response.status, 404);
}

#[tokio::test(flavor = "multi_thread")]
async fn upstream_error_aborts_stream() {
    let (base_url, _temp_dir) = spawn_app(vec!["답변"], false).await;

    let response = get(format!("{base_url}/api/conversation/message?user_message=hello")).await;
    let data = response.body.map(|body| sse_data(&body)).unwrap_or_default();
    assert!(data.is_empty());
}
