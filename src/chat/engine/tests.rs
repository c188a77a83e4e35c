use super::*;
use crate::FaqError;
use crate::chat::prompts::EMPTY_RESPONSE;
use crate::config::RetrievalConfig;
use crate::chat::query_engine::{RetrievedChunk, Retriever};
use crate::llm::Role;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tempfile::TempDir;

type RecordedCall = (Vec<ChatMessage>, Vec<ToolSpec>);

/// Replays one scripted delta sequence per `stream_chat` call
struct ScriptedModel {
    scripts: Mutex<VecDeque<Vec<ChatDelta>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    fn new(scripts: Vec<Vec<ChatDelta>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        Ok("검색 결과".to_string())
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<DeltaStream> {
        self.calls
            .lock()
            .expect("lock poisoned")
            .push((messages.to_vec(), tools.to_vec()));
        let script = self
            .scripts
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .ok_or_else(|| FaqError::Llm("no script left".to_string()))?;
        Ok(Box::pin(futures::stream::iter(script.into_iter().map(Ok::<_, FaqError>))))
    }
}

struct StaticRetriever;

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<RetrievedChunk>> {
        Ok(vec![RetrievedChunk {
            text: "배송은 3일 걸립니다.".to_string(),
            score: 1.0,
        }])
    }
}

struct UnitEmbedder;

#[async_trait]
impl Embedder for UnitEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

fn text(content: &str) -> ChatDelta {
    ChatDelta::Content(content.to_string())
}

fn tool_fragment(id: Option<&str>, name: Option<&str>, arguments: &str) -> ChatDelta {
    ChatDelta::ToolCall {
        index: 0,
        id: id.map(str::to_string),
        name: name.map(str::to_string),
        arguments: arguments.to_string(),
    }
}

fn engine(model: &Arc<ScriptedModel>) -> ChatEngine {
    let llm: Arc<dyn ChatModel> = Arc::clone(model) as Arc<dyn ChatModel>;
    let synthesizer = ResponseSynthesizer::new(Arc::clone(&llm), &RetrievalConfig::default());
    ChatEngine::new(llm, QueryEngine::new(Box::new(StaticRetriever), synthesizer))
}

#[tokio::test]
async fn text_answer_is_streamed() {
    let model = ScriptedModel::new(vec![vec![text("안녕"), text("하세요")]]);

    let response = engine(&model)
        .stream_chat("안녕?")
        .await
        .expect("chat should succeed");
    let mut stream = response.into_stream();
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        chunks.push(chunk.expect("chunk should be ok"));
    }
    assert_eq!(chunks, vec!["안녕".to_string(), "하세요".to_string()]);

    let calls = model.calls();
    assert_eq!(calls.len(), 1);
    let (messages, tools) = &calls[0];
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[0].content_str(), SYSTEM_MESSAGE);
    assert_eq!(messages[1], ChatMessage::user("안녕?"));
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, QUERY_ENGINE_TOOL_NAME);
}

#[tokio::test]
async fn tool_call_is_executed_before_answering() {
    let model = ScriptedModel::new(vec![
        vec![
            tool_fragment(Some("call_1"), Some(QUERY_ENGINE_TOOL_NAME), "{\"input\":"),
            tool_fragment(None, None, "\"배송 기간\"}"),
        ],
        vec![text("배송은 "), text("3일 걸립니다.")],
    ]);

    let answer = engine(&model)
        .stream_chat("배송 얼마나 걸려?")
        .await
        .expect("chat should succeed")
        .collect_all()
        .await
        .expect("stream should succeed");
    assert_eq!(answer, "배송은 3일 걸립니다.");

    let calls = model.calls();
    assert_eq!(calls.len(), 2);
    let (messages, _) = &calls[1];
    assert_eq!(messages.len(), 4);
    assert_eq!(
        messages[2],
        ChatMessage::assistant_tool_calls(vec![ToolCall::function(
            "call_1",
            QUERY_ENGINE_TOOL_NAME,
            "{\"input\":\"배송 기간\"}"
        )])
    );
    assert_eq!(messages[3], ChatMessage::tool("call_1", "검색 결과"));
}

#[tokio::test]
async fn unknown_tool_gets_error_output() {
    let model = ScriptedModel::new(vec![
        vec![tool_fragment(Some("call_9"), Some("weather"), "{}")],
        vec![text("모르겠습니다.")],
    ]);

    let answer = engine(&model)
        .stream_chat("날씨 어때?")
        .await
        .expect("chat should succeed")
        .collect_all()
        .await
        .expect("stream should succeed");
    assert_eq!(answer, "모르겠습니다.");

    let calls = model.calls();
    let tool_message = &calls[1].0[3];
    assert_eq!(tool_message.role, Role::Tool);
    assert_eq!(tool_message.content_str(), "Error: tool weather does not exist");
}

#[tokio::test]
async fn tools_are_withheld_after_limit() {
    let call = || {
        tool_fragment(
            Some("call_1"),
            Some(QUERY_ENGINE_TOOL_NAME),
            "{\"input\":\"배송\"}",
        )
    };
    let model = ScriptedModel::new(vec![vec![call()], vec![call()], vec![text("답변")]]);

    let answer = engine(&model)
        .with_max_function_calls(2)
        .stream_chat("배송")
        .await
        .expect("chat should succeed")
        .collect_all()
        .await
        .expect("stream should succeed");
    assert_eq!(answer, "답변");

    let offered: Vec<usize> = model.calls().iter().map(|(_, tools)| tools.len()).collect();
    assert_eq!(offered, vec![1, 1, 0]);
}

#[tokio::test]
async fn tool_calls_past_limit_are_dropped() {
    let call = || {
        tool_fragment(
            Some("call_1"),
            Some(QUERY_ENGINE_TOOL_NAME),
            "{\"input\":\"배송\"}",
        )
    };
    let model = ScriptedModel::new(vec![vec![call()], vec![call()], vec![call()]]);

    let response = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        engine(&model).with_max_function_calls(1).stream_chat("배송"),
    )
    .await
    .expect("tool loop should stop")
    .expect("chat should succeed");
    let answer = response.collect_all().await.expect("stream should succeed");
    assert!(answer.is_empty());

    let offered: Vec<usize> = model.calls().iter().map(|(_, tools)| tools.len()).collect();
    assert_eq!(offered, vec![1, 0]);
}

#[tokio::test]
async fn text_after_dropped_tool_call_is_streamed() {
    let model = ScriptedModel::new(vec![vec![
        tool_fragment(Some("call_1"), Some(QUERY_ENGINE_TOOL_NAME), "{}"),
        text("바로 답변"),
    ]]);

    let answer = engine(&model)
        .with_max_function_calls(0)
        .stream_chat("배송")
        .await
        .expect("chat should succeed")
        .collect_all()
        .await
        .expect("stream should succeed");
    assert_eq!(answer, "바로 답변");
    assert_eq!(model.calls().len(), 1);
}

#[tokio::test]
async fn empty_model_stream_is_empty_answer() {
    let model = ScriptedModel::new(vec![Vec::new()]);

    let answer = engine(&model)
        .stream_chat("...")
        .await
        .expect("chat should succeed")
        .collect_all()
        .await
        .expect("stream should succeed");
    assert!(answer.is_empty());
}

#[tokio::test]
async fn history_and_custom_prompt_are_sent() {
    let model = ScriptedModel::new(vec![vec![text("네")]]);
    let history = vec![ChatMessage::user("이전 질문"), ChatMessage::assistant("이전 답변")];

    engine(&model)
        .with_system_prompt("간단히 답해")
        .with_chat_history(history.clone())
        .stream_chat("다음 질문")
        .await
        .expect("chat should succeed");

    let calls = model.calls();
    let (messages, _) = &calls[0];
    assert_eq!(messages[0], ChatMessage::system("간단히 답해"));
    assert_eq!(&messages[1..3], history.as_slice());
    assert_eq!(messages[3], ChatMessage::user("다음 질문"));
}

#[tokio::test]
async fn model_errors_propagate() {
    let model = ScriptedModel::new(Vec::new());
    let result = engine(&model).stream_chat("배송").await;
    assert!(matches!(result, Err(FaqError::Llm(_))));
}

fn factory_settings(temp_dir: &TempDir) -> Arc<Settings> {
    let mut settings = Settings::default();
    settings.openai.api_key = "sk-test".to_string();
    settings.base_dir = temp_dir.path().to_path_buf();
    settings.data.vector_db_path = "vectors".into();
    Arc::new(settings)
}

#[tokio::test]
async fn factory_requires_collection_path() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let settings = factory_settings(&temp_dir);
    let model = ScriptedModel::new(Vec::new());
    let factory = ChatEngineFactory::new(Arc::clone(&settings), Arc::new(UnitEmbedder), model);

    let result = factory.build().await;
    assert!(matches!(
        result,
        Err(FaqError::CollectionNotFound(path)) if path == settings.vector_db_path()
    ));
}

#[tokio::test]
async fn factory_engine_over_empty_collection() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let settings = factory_settings(&temp_dir);
    std::fs::create_dir_all(settings.vector_db_path()).expect("should create db dir");

    let model = ScriptedModel::new(vec![
        vec![tool_fragment(
            Some("call_1"),
            Some(QUERY_ENGINE_TOOL_NAME),
            "{\"input\":\"배송\"}",
        )],
        vec![text("답변")],
    ]);
    let llm: Arc<dyn ChatModel> = Arc::clone(&model) as Arc<dyn ChatModel>;
    let factory = ChatEngineFactory::new(settings, Arc::new(UnitEmbedder), llm);

    let answer = factory
        .build()
        .await
        .expect("engine should build")
        .stream_chat("배송")
        .await
        .expect("chat should succeed")
        .collect_all()
        .await
        .expect("stream should succeed");
    assert_eq!(answer, "답변");

    let calls = model.calls();
    assert_eq!(calls[1].0[3], ChatMessage::tool("call_1", EMPTY_RESPONSE));
}
