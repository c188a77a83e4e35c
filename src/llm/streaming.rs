// Streaming response handling

use std::pin::Pin;

use futures::{Stream, StreamExt};

use crate::Result;

/// Stream of answer text fragments
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Streaming answer from the chat engine
pub struct StreamingResponse {
    stream: TextStream,
}

impl std::fmt::Debug for StreamingResponse {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse").finish_non_exhaustive()
    }
}

impl StreamingResponse {
    #[inline]
    pub fn new(stream: TextStream) -> Self {
        Self { stream }
    }

    /// Collect all chunks into a single string
    #[inline]
    pub async fn collect_all(mut self) -> Result<String> {
        let mut result = String::new();
        while let Some(chunk) = self.stream.next().await {
            result.push_str(&chunk?);
        }
        Ok(result)
    }

    /// Get the underlying stream
    #[inline]
    pub fn into_stream(self) -> TextStream {
        self.stream
    }
}
