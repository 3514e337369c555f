mod common;
mod gemini;
mod sse;

pub use gemini::{
    GeminiConfig, GeminiProvider, DEFAULT_CHAT_MODEL, DEFAULT_GEMINI_BASE_URL,
    DEFAULT_VIDEO_MODEL,
};
