use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::credential::CredentialSource;
use crate::error::{AiError, AiErrorCode};
use crate::event_stream::ChatStream;
use crate::provider::GenAiProviderRef;
use crate::types::ConversationTurn;

/// Multi-turn conversation front door.
///
/// Each call replays the caller's history to the provider; the session keeps
/// no transcript of its own. Only one reply may be streaming at a time.
pub struct ChatSession {
    provider: GenAiProviderRef,
    credentials: CredentialSource,
    busy: Arc<AtomicBool>,
}

impl ChatSession {
    pub fn new(provider: GenAiProviderRef, credentials: CredentialSource) -> Self {
        Self {
            provider,
            credentials,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn send_message(
        &self,
        history: &[ConversationTurn],
        new_message: &str,
    ) -> Result<ChatStream, AiError> {
        if new_message.trim().is_empty() {
            return Err(AiError::invalid_input("chat message must not be empty"));
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AiError::new(
                AiErrorCode::ChatInFlight,
                "a reply is still streaming for this session",
            ));
        }

        let Some(credential) = self.credentials.resolve() else {
            self.busy.store(false, Ordering::SeqCst);
            return Err(AiError::new(
                AiErrorCode::CredentialMissing,
                "No API key available for chat",
            ));
        };

        let (mut writer, stream) = ChatStream::channel(Some(self.busy.clone()));
        let provider = self.provider.clone();
        let history = history.to_vec();
        let message = new_message.to_string();
        debug!(
            provider = provider.name(),
            turns = history.len(),
            "sending chat message"
        );

        spawn_provider_task(async move {
            let mut fragments = match provider.stream_chat(credential, history, message).await {
                Ok(fragments) => fragments,
                Err(error) => {
                    warn!(code = ?error.code, "chat request failed: {}", error.message);
                    writer.fail(error);
                    return;
                }
            };

            while let Some(item) = fragments.next().await {
                match item {
                    Ok(fragment) => writer.push_fragment(&fragment),
                    Err(error) => {
                        warn!(
                            code = ?error.code,
                            delivered = writer.text().len(),
                            "chat stream aborted: {}",
                            error.message
                        );
                        writer.fail(error);
                        return;
                    }
                }
            }
            writer.finish();
        });

        Ok(stream)
    }
}

fn spawn_provider_task<F>(task: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(task);
        return;
    }

    std::thread::spawn(move || {
        if let Ok(runtime) = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            runtime.block_on(task);
        }
    });
}
