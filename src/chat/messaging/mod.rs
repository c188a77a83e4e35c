// Message handling
// Streams one answer per user message, substituting a fallback for blank answers

#[cfg(test)]
mod tests;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::debug;

use super::engine::ChatEngineFactory;
use super::prompts::FALLBACK_MESSAGE;
use crate::Result;

/// Answer `user_message` as a lazy stream of text fragments.
///
/// Nothing happens until the stream is first polled; then a fresh engine is
/// built and every model delta is forwarded as it arrives. If the whole answer
/// turns out blank, the fallback sentence follows as one more fragment. The
/// first error ends the stream.
#[inline]
pub fn handle_chat_message(
    factory: Arc<ChatEngineFactory>,
    user_message: String,
) -> impl Stream<Item = Result<String>> + Send + 'static {
    async_stream::try_stream! {
        let engine = factory.build().await?;
        debug!("Engine received");

        let mut stream = engine.stream_chat(&user_message).await?.into_stream();
        let mut response_str = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            response_str.push_str(&chunk);
            yield chunk;
        }

        if response_str.trim().is_empty() {
            debug!("Blank answer, sending fallback message");
            yield FALLBACK_MESSAGE.to_string();
        }
    }
}
