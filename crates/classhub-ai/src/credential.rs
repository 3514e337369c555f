use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{AiError, AiErrorCode};

pub const DEFAULT_CREDENTIAL_ENVS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

pub type HostFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

pub type HasSelectedFn = Arc<dyn Fn() -> HostFuture<bool> + Send + Sync>;

pub type OpenSelectionFn = Arc<dyn Fn() -> HostFuture<()> + Send + Sync>;

/// Optional credential hooks offered by the host environment.
///
/// Either member may be missing; the gate checks each one at the call site.
#[derive(Clone, Default)]
pub struct CredentialCapability {
    pub has_selected: Option<HasSelectedFn>,
    pub open_selection: Option<OpenSelectionFn>,
}

impl CredentialCapability {
    pub fn absent() -> Self {
        Self::default()
    }
}

/// API key. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Where the active key comes from, consulted fresh on every lookup:
/// the host-selected slot, then the configured key, then environment variables.
#[derive(Clone, Debug)]
pub struct CredentialSource {
    selected: Arc<RwLock<Option<Credential>>>,
    configured: Option<Credential>,
    env_keys: Vec<String>,
}

impl Default for CredentialSource {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CredentialSource {
    pub fn new(configured: Option<String>) -> Self {
        Self {
            selected: Arc::new(RwLock::new(None)),
            configured: configured.and_then(Credential::new),
            env_keys: DEFAULT_CREDENTIAL_ENVS
                .iter()
                .map(|key| key.to_string())
                .collect(),
        }
    }

    pub fn with_env_keys<I, S>(mut self, env_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env_keys = env_keys.into_iter().map(Into::into).collect();
        self
    }

    /// Records a key chosen through the host's interactive selection flow.
    pub fn select(&self, credential: Credential) {
        let mut slot = self
            .selected
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(credential);
    }

    pub fn clear_selection(&self) {
        let mut slot = self
            .selected
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }

    pub fn has_selection(&self) -> bool {
        self.selected
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    pub fn resolve(&self) -> Option<Credential> {
        if let Some(selected) = self
            .selected
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
        {
            return Some(selected);
        }

        if let Some(configured) = &self.configured {
            return Some(configured.clone());
        }

        self.env_keys
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .find_map(Credential::new)
    }

    fn env_hint(&self) -> String {
        self.env_keys.join(" / ")
    }
}

/// What the gate does when the host offers no way to check for a selected key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialPolicy {
    /// Assume the key is supplied out of band.
    #[default]
    FailOpen,
    /// Require a key to resolve from the credential source.
    FailClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    Completed,
    Unavailable,
}

pub struct CredentialGate {
    capability: CredentialCapability,
    source: CredentialSource,
    policy: CredentialPolicy,
    prompts: AtomicUsize,
}

impl CredentialGate {
    pub fn new(capability: CredentialCapability, source: CredentialSource) -> Self {
        Self {
            capability,
            source,
            policy: CredentialPolicy::default(),
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn with_policy(mut self, policy: CredentialPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    pub async fn check_credential(&self) -> bool {
        if let Some(has_selected) = &self.capability.has_selected {
            return has_selected().await;
        }

        match self.policy {
            CredentialPolicy::FailOpen => {
                warn!("no credential check available from host; failing open");
                true
            }
            CredentialPolicy::FailClosed => self.source.resolve().is_some(),
        }
    }

    /// Suspends until the host selection flow returns, or returns at once when
    /// the host has none.
    pub async fn request_credential(&self) -> PromptOutcome {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        match &self.capability.open_selection {
            Some(open_selection) => {
                info!("opening host credential selection");
                open_selection().await;
                PromptOutcome::Completed
            }
            None => {
                warn!("credential selection is not available in this environment");
                PromptOutcome::Unavailable
            }
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn active_credential(&self) -> Result<Credential, AiError> {
        self.source.resolve().ok_or_else(|| {
            AiError::new(
                AiErrorCode::CredentialMissing,
                format!(
                    "No API key selected. Select one or set {}.",
                    self.source.env_hint()
                ),
            )
        })
    }
}
