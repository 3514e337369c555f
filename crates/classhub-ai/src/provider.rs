use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;

use crate::credential::Credential;
use crate::error::AiError;
use crate::types::{ConversationHistory, GenerationOperation, GenerationRequest, OperationHandle};

pub type ProviderFuture<T> = Pin<Box<dyn Future<Output = Result<T, AiError>> + Send>>;

/// Reply fragments in arrival order. An `Err` item ends the reply.
pub type FragmentSource = Pin<Box<dyn Stream<Item = Result<String, AiError>> + Send>>;

/// Remote generative AI service used by the chat session and the
/// generation pipeline.
pub trait GenAiProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Opens a conversation seeded with `history` and sends `message`.
    fn stream_chat(
        &self,
        credential: Credential,
        history: ConversationHistory,
        message: String,
    ) -> ProviderFuture<FragmentSource>;

    fn submit_generation(
        &self,
        credential: Credential,
        request: GenerationRequest,
    ) -> ProviderFuture<GenerationOperation>;

    fn fetch_operation(
        &self,
        credential: Credential,
        handle: OperationHandle,
    ) -> ProviderFuture<GenerationOperation>;
}

pub type GenAiProviderRef = Arc<dyn GenAiProvider>;
