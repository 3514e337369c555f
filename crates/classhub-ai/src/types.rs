use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::AiError;

pub const DEFAULT_ANIMATION_PROMPT: &str = "Animate this image cinematically.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "model")]
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    role: Role,
    text: String,
}

impl ConversationTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, text)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Oldest turn first. Replayed to the provider in this order.
pub type ConversationHistory = Vec<ConversationTurn>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub text: String,
    pub fragments: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Fragment(String),
    Done(ChatReply),
    Error(AiError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Hd1080,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Hd720 => "720p",
            Resolution::Hd1080 => "1080p",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
        }
    }
}

/// One image-to-video submission. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    image_bytes: Vec<u8>,
    mime_type: String,
    prompt_text: String,
    number_of_videos: u32,
    resolution: Resolution,
    aspect_ratio: AspectRatio,
}

impl GenerationRequest {
    /// Validates the image and falls back to [`DEFAULT_ANIMATION_PROMPT`]
    /// when `prompt_text` is blank.
    pub fn new(image: ImageInput, prompt_text: &str) -> Result<Self, AiError> {
        if image.bytes.is_empty() {
            return Err(AiError::invalid_input("an image is required for generation"));
        }
        let mime_type = image.mime_type.trim().to_ascii_lowercase();
        if !mime_type.starts_with("image/") {
            return Err(AiError::invalid_input(format!(
                "unsupported mime type '{}', expected image/*",
                image.mime_type
            )));
        }

        let prompt_text = if prompt_text.trim().is_empty() {
            DEFAULT_ANIMATION_PROMPT.to_string()
        } else {
            prompt_text.to_string()
        };

        Ok(Self {
            image_bytes: image.bytes,
            mime_type,
            prompt_text,
            number_of_videos: 1,
            resolution: Resolution::Hd720,
            aspect_ratio: AspectRatio::Landscape,
        })
    }

    pub fn image_bytes(&self) -> &[u8] {
        &self.image_bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn prompt_text(&self) -> &str {
        &self.prompt_text
    }

    pub fn number_of_videos(&self) -> u32 {
        self.number_of_videos
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle(String);

impl OperationHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OperationHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error reported inside a finished operation rather than as an HTTP failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub code: Option<i32>,
    pub message: String,
}

/// Remote generation job. The poll loop takes it by value, so only the
/// current owner can observe or refresh it.
#[derive(Debug, PartialEq, Eq)]
pub struct GenerationOperation {
    pub handle: OperationHandle,
    pub done: bool,
    pub result_uri: Option<String>,
    pub failure: Option<OperationFailure>,
}

impl GenerationOperation {
    pub fn pending(handle: OperationHandle) -> Self {
        Self {
            handle,
            done: false,
            result_uri: None,
            failure: None,
        }
    }
}

/// Playable locator: provider URI plus the credential as `key` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedVideo {
    pub locator: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AiErrorCode;

    fn jpeg() -> ImageInput {
        ImageInput::new(vec![0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg")
    }

    #[test]
    fn blank_prompt_falls_back_to_default_animation_prompt() {
        let request = GenerationRequest::new(jpeg(), "   ").expect("valid request");
        assert_eq!(request.prompt_text(), DEFAULT_ANIMATION_PROMPT);
        assert_eq!(request.number_of_videos(), 1);
        assert_eq!(request.resolution().as_str(), "720p");
        assert_eq!(request.aspect_ratio().as_str(), "16:9");
    }

    #[test]
    fn explicit_prompt_is_kept_verbatim() {
        let request = GenerationRequest::new(jpeg(), "camera pans right").expect("valid request");
        assert_eq!(request.prompt_text(), "camera pans right");
    }

    #[test]
    fn empty_image_is_rejected() {
        let error = GenerationRequest::new(ImageInput::new(Vec::new(), "image/png"), "")
            .expect_err("empty image must be rejected");
        assert_eq!(error.code, AiErrorCode::UserInputInvalid);
    }

    #[test]
    fn non_image_mime_type_is_rejected() {
        let error = GenerationRequest::new(ImageInput::new(vec![1, 2, 3], "video/mp4"), "")
            .expect_err("video mime must be rejected");
        assert_eq!(error.code, AiErrorCode::UserInputInvalid);
        assert!(error.message.contains("video/mp4"));
    }

    #[test]
    fn roles_serialize_as_provider_names() {
        let turn = ConversationTurn::model("hi");
        let encoded = serde_json::to_string(&turn).expect("serialize turn");
        assert_eq!(encoded, r#"{"role":"model","text":"hi"}"#);
    }
}
