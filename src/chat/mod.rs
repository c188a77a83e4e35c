// Chat module
// Retrieval, answer synthesis, the tool-calling agent and the message handler

pub mod engine;
pub mod messaging;
pub mod prompts;
pub mod query_engine;
pub mod synthesizer;

pub use engine::{ChatEngine, ChatEngineFactory};
pub use messaging::handle_chat_message;
pub use query_engine::{QueryEngine, RetrievedChunk, Retriever, VectorRetriever};
pub use synthesizer::ResponseSynthesizer;
