//! Gemini-backed teaching assistant chat and image-to-video generation.

mod chat;
mod classifier;
mod credential;
mod error;
mod event_stream;
mod generation;
mod provider;
mod providers;
mod types;

pub use chat::ChatSession;
pub use classifier::{ErrorClass, ErrorClassifier, PhraseClassifier, ENTITY_NOT_FOUND_PHRASE};
pub use credential::{
    Credential, CredentialCapability, CredentialGate, CredentialPolicy, CredentialSource,
    HasSelectedFn, HostFuture, OpenSelectionFn, PromptOutcome, DEFAULT_CREDENTIAL_ENVS,
};
pub use error::{AiError, AiErrorCode};
pub use event_stream::ChatStream;
pub use generation::{GenerationPipeline, DEFAULT_POLL_INTERVAL};
pub use provider::{FragmentSource, GenAiProvider, GenAiProviderRef, ProviderFuture};
pub use providers::{
    GeminiConfig, GeminiProvider, DEFAULT_CHAT_MODEL, DEFAULT_GEMINI_BASE_URL,
    DEFAULT_VIDEO_MODEL,
};
pub use types::{
    AspectRatio, ChatEvent, ChatReply, ConversationHistory, ConversationTurn, GeneratedVideo,
    GenerationOperation, GenerationRequest, ImageInput, OperationFailure, OperationHandle,
    Resolution, Role, DEFAULT_ANIMATION_PROMPT,
};
