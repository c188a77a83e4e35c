use super::*;
use crate::FaqError;
use crate::config::Settings;
use crate::embeddings::Embedder;
use crate::llm::{ChatDelta, ChatMessage, ChatModel, DeltaStream, ToolSpec};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Streams the same text deltas on every call
struct FixedModel {
    deltas: Vec<&'static str>,
    calls: AtomicUsize,
}

impl FixedModel {
    fn new(deltas: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            deltas,
            calls: AtomicUsize::new(0),
        })
    }
}

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
        self.calls.fetch_add(1, Ordering::SeqCst);
        let deltas: Vec<Result<ChatDelta>> = self
            .deltas
            .iter()
            .map(|text| Ok(ChatDelta::Content((*text).to_string())))
            .collect();
        Ok(Box::pin(futures::stream::iter(deltas)))
    }
}

/// Yields one delta, then fails
struct BrokenStreamModel;

#[async_trait]
impl ChatModel for BrokenStreamModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        Ok(String::new())
    }

    async fn stream_chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<DeltaStream> {
        Ok(Box::pin(futures::stream::iter(vec![
            Ok(ChatDelta::Content("부분".to_string())),
            Err(FaqError::Llm("connection reset".to_string())),
            Ok(ChatDelta::Content("도달하지 않음".to_string())),
        ])))
    }
}

struct UnitEmbedder;

#[async_trait]
impl Embedder for UnitEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

fn factory(
    temp_dir: &TempDir,
    llm: Arc<dyn ChatModel>,
    create_db: bool,
) -> Arc<ChatEngineFactory> {
    let mut settings = Settings::default();
    settings.openai.api_key = "sk-test".to_string();
    settings.base_dir = temp_dir.path().to_path_buf();
    settings.data.vector_db_path = "vectors".into();
    if create_db {
        std::fs::create_dir_all(settings.vector_db_path()).expect("should create db dir");
    }
    Arc::new(ChatEngineFactory::new(
        Arc::new(settings),
        Arc::new(UnitEmbedder),
        llm,
    ))
}

async fn collect(factory: Arc<ChatEngineFactory>, message: &str) -> Vec<Result<String>> {
    handle_chat_message(factory, message.to_string())
        .collect()
        .await
}

#[tokio::test]
async fn fragments_are_forwarded_verbatim() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let model = FixedModel::new(vec!["스마트스토어는 ", "네이버의 ", "쇼핑 플랫폼입니다.\n"]);
    let factory = factory(&temp_dir, model, true);

    let chunks: Vec<String> = collect(factory, "스마트스토어가 뭐야?")
        .await
        .into_iter()
        .map(|chunk| chunk.expect("chunk should be ok"))
        .collect();

    assert_eq!(
        chunks,
        vec!["스마트스토어는 ", "네이버의 ", "쇼핑 플랫폼입니다.\n"]
    );
    assert_eq!(chunks.concat(), "스마트스토어는 네이버의 쇼핑 플랫폼입니다.\n");
}

#[tokio::test]
async fn blank_answer_gets_fallback() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let factory = factory(&temp_dir, FixedModel::new(vec![" ", "\n", "\t"]), true);

    let chunks: Vec<String> = collect(factory, "오늘 저녁 메뉴는?")
        .await
        .into_iter()
        .map(|chunk| chunk.expect("chunk should be ok"))
        .collect();

    let non_blank: Vec<&String> = chunks
        .iter()
        .filter(|chunk| !chunk.trim().is_empty())
        .collect();
    assert_eq!(non_blank, vec![FALLBACK_MESSAGE]);
    assert_eq!(chunks.last().map(String::as_str), Some(FALLBACK_MESSAGE));
}

#[tokio::test]
async fn no_deltas_is_exactly_fallback() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let factory = factory(&temp_dir, FixedModel::new(Vec::new()), true);

    let chunks: Vec<String> = collect(factory, "?")
        .await
        .into_iter()
        .map(|chunk| chunk.expect("chunk should be ok"))
        .collect();
    assert_eq!(chunks, vec![FALLBACK_MESSAGE.to_string()]);
}

#[tokio::test]
async fn stream_is_lazy() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let model = FixedModel::new(vec!["답변"]);
    let factory = factory(&temp_dir, Arc::clone(&model) as Arc<dyn ChatModel>, true);

    let stream = handle_chat_message(factory, "배송".to_string());
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);

    let chunks: Vec<Result<String>> = stream.collect().await;
    assert_eq!(chunks.len(), 1);
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_collection_is_an_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let model = FixedModel::new(vec!["답변"]);
    let factory = factory(&temp_dir, Arc::clone(&model) as Arc<dyn ChatModel>, false);

    let chunks = collect(factory, "배송").await;
    assert_eq!(chunks.len(), 1);
    assert!(matches!(chunks[0], Err(FaqError::CollectionNotFound(_))));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stream_error_ends_the_stream() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let factory = factory(&temp_dir, Arc::new(BrokenStreamModel), true);

    let chunks = collect(factory, "배송").await;
    assert_eq!(chunks.len(), 2);
    assert!(matches!(&chunks[0], Ok(text) if text == "부분"));
    assert!(matches!(chunks[1], Err(FaqError::Llm(_))));
}
