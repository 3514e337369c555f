use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiErrorCode {
    CredentialMissing,
    SessionExpired,
    GenerationFailed,
    UserInputInvalid,
    ChatInFlight,
    ProviderHttp,
    ProviderTransport,
    ProviderProtocol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiError {
    pub code: AiErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AiError {
    pub fn new(code: AiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(AiErrorCode::UserInputInvalid, message)
    }

    pub fn generation_failed(message: impl Into<String>) -> Self {
        Self::new(AiErrorCode::GenerationFailed, message)
    }

    /// True for failures that came straight from talking to the provider,
    /// before any classification.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self.code,
            AiErrorCode::ProviderHttp | AiErrorCode::ProviderTransport | AiErrorCode::ProviderProtocol
        )
    }
}

impl Display for AiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for AiError {}
