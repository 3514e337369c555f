use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::error::{AiError, AiErrorCode};
use crate::types::{ChatEvent, ChatReply};

/// Consumer half of a streamed chat reply.
///
/// Yields `Fragment` events in arrival order followed by exactly one terminal
/// `Done` or `Error`; after the terminal event the stream is exhausted. There is
/// a single consumer, so the type is intentionally not `Clone`.
pub struct ChatStream {
    receiver: mpsc::UnboundedReceiver<ChatEvent>,
    finished: bool,
}

impl ChatStream {
    pub(crate) fn channel(busy: Option<Arc<AtomicBool>>) -> (ChatStreamWriter, ChatStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = ChatStreamWriter {
            sender,
            text: String::new(),
            fragments: 0,
            busy,
            closed: false,
        };
        let stream = ChatStream {
            receiver,
            finished: false,
        };
        (writer, stream)
    }

    pub async fn next(&mut self) -> Option<ChatEvent> {
        if self.finished {
            return None;
        }
        let event = self.receiver.recv().await;
        self.observe(event)
    }

    /// Drains the stream and returns the terminal result.
    pub async fn reply(mut self) -> Result<ChatReply, AiError> {
        while let Some(event) = self.next().await {
            match event {
                ChatEvent::Fragment(_) => {}
                ChatEvent::Done(reply) => return Ok(reply),
                ChatEvent::Error(error) => return Err(error),
            }
        }
        Err(AiError::new(
            AiErrorCode::ProviderProtocol,
            "Chat stream ended without terminal event",
        ))
    }

    /// Concatenates fragments in delivery order.
    pub async fn collect_text(mut self) -> Result<String, AiError> {
        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event {
                ChatEvent::Fragment(fragment) => text.push_str(&fragment),
                ChatEvent::Done(_) => return Ok(text),
                ChatEvent::Error(error) => return Err(error),
            }
        }
        Err(AiError::new(
            AiErrorCode::ProviderProtocol,
            "Chat stream ended without terminal event",
        ))
    }

    fn observe(&mut self, event: Option<ChatEvent>) -> Option<ChatEvent> {
        match event {
            Some(ChatEvent::Fragment(text)) => Some(ChatEvent::Fragment(text)),
            Some(terminal) => {
                self.finished = true;
                Some(terminal)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}

impl Stream for ChatStream {
    type Item = ChatEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(event) => Poll::Ready(self.observe(event)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Producer half, owned by the provider task.
pub(crate) struct ChatStreamWriter {
    sender: mpsc::UnboundedSender<ChatEvent>,
    text: String,
    fragments: usize,
    busy: Option<Arc<AtomicBool>>,
    closed: bool,
}

impl ChatStreamWriter {
    /// Empty fragments are dropped; they carry nothing to render.
    pub fn push_fragment(&mut self, fragment: &str) {
        if self.closed || fragment.is_empty() {
            return;
        }
        self.text.push_str(fragment);
        self.fragments += 1;
        let _ = self.sender.send(ChatEvent::Fragment(fragment.to_string()));
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn finish(mut self) {
        let reply = ChatReply {
            text: std::mem::take(&mut self.text),
            fragments: self.fragments,
        };
        self.close(ChatEvent::Done(reply));
    }

    pub fn fail(mut self, error: AiError) {
        self.close(ChatEvent::Error(error));
    }

    // The session slot is released before the terminal event is visible, so a
    // consumer reacting to `Done` can send its next message immediately.
    fn close(&mut self, terminal: ChatEvent) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(busy) = self.busy.take() {
            busy.store(false, Ordering::SeqCst);
        }
        let _ = self.sender.send(terminal);
    }
}

impl Drop for ChatStreamWriter {
    fn drop(&mut self) {
        self.close(ChatEvent::Error(AiError::new(
            AiErrorCode::ProviderProtocol,
            "Chat provider stopped without finishing the stream",
        )));
    }
}
