//! Maps raw provider failure text onto recoverable vs. fatal conditions.

pub const ENTITY_NOT_FOUND_PHRASE: &str = "Requested entity was not found";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The credential or the remote reference it scoped has gone stale.
    SessionExpired,
    Generic,
}

pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, raw_message: &str) -> ErrorClass;
}

/// Substring heuristic over unstructured provider wording.
#[derive(Debug, Clone)]
pub struct PhraseClassifier {
    expired_phrases: Vec<String>,
}

impl Default for PhraseClassifier {
    fn default() -> Self {
        Self {
            expired_phrases: vec![ENTITY_NOT_FOUND_PHRASE.to_string()],
        }
    }
}

impl PhraseClassifier {
    /// Adds phrases on top of the built-in one. Blank entries are ignored.
    pub fn with_extra_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for phrase in phrases {
            let phrase = phrase.into();
            if phrase.trim().is_empty() || self.expired_phrases.contains(&phrase) {
                continue;
            }
            self.expired_phrases.push(phrase);
        }
        self
    }

    pub fn phrases(&self) -> &[String] {
        &self.expired_phrases
    }
}

impl ErrorClassifier for PhraseClassifier {
    fn classify(&self, raw_message: &str) -> ErrorClass {
        if self
            .expired_phrases
            .iter()
            .any(|phrase| raw_message.contains(phrase.as_str()))
        {
            ErrorClass::SessionExpired
        } else {
            ErrorClass::Generic
        }
    }
}
