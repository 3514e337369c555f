use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::classifier::{ErrorClass, ErrorClassifier, PhraseClassifier};
use crate::credential::{Credential, CredentialGate};
use crate::error::{AiError, AiErrorCode};
use crate::provider::GenAiProviderRef;
use crate::types::{GeneratedVideo, GenerationOperation, GenerationRequest, ImageInput};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Image-to-video job driver: submit, poll until done, extract the locator.
pub struct GenerationPipeline {
    provider: GenAiProviderRef,
    gate: Arc<CredentialGate>,
    classifier: Arc<dyn ErrorClassifier>,
    poll_interval: Duration,
    max_poll_attempts: Option<u32>,
}

impl GenerationPipeline {
    pub fn new(provider: GenAiProviderRef, gate: Arc<CredentialGate>) -> Self {
        Self {
            provider,
            gate,
            classifier: Arc::new(PhraseClassifier::default()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// `None` polls until the provider reports completion, however long that takes.
    pub fn with_max_poll_attempts(mut self, max_poll_attempts: Option<u32>) -> Self {
        self.max_poll_attempts = max_poll_attempts;
        self
    }

    pub fn gate(&self) -> &CredentialGate {
        &self.gate
    }

    /// Gated end-to-end flow. When the gate refuses, the host selection flow
    /// is opened and `CredentialMissing` is returned without submitting; the
    /// caller submits again once a key is selected.
    pub async fn generate(
        &self,
        image: ImageInput,
        prompt_text: &str,
    ) -> Result<GeneratedVideo, AiError> {
        let request = GenerationRequest::new(image, prompt_text)?;

        if !self.gate.check_credential().await {
            info!("no API key selected; opening credential selection instead of submitting");
            self.gate.request_credential().await;
            return Err(AiError::new(
                AiErrorCode::CredentialMissing,
                "Select an API key, then submit the generation again",
            ));
        }

        let operation = self.submit_request(request).await?;
        let operation = self.wait_for_completion(operation).await?;
        let credential = self.gate.active_credential()?;
        self.extract_result(operation, &credential).await
    }

    pub async fn submit(
        &self,
        image: ImageInput,
        prompt_text: &str,
    ) -> Result<GenerationOperation, AiError> {
        let request = GenerationRequest::new(image, prompt_text)?;
        self.submit_request(request).await
    }

    async fn submit_request(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOperation, AiError> {
        let credential = match self.gate.active_credential() {
            Ok(credential) => credential,
            Err(error) => {
                info!("no API key resolves; opening credential selection");
                self.gate.request_credential().await;
                return Err(error);
            }
        };
        let prompt_chars = request.prompt_text().chars().count();
        let image_bytes = request.image_bytes().len();
        let operation = match self.provider.submit_generation(credential, request).await {
            Ok(operation) => operation,
            Err(error) => return Err(self.escalate(error).await),
        };
        info!(
            provider = self.provider.name(),
            handle = %operation.handle,
            image_bytes,
            prompt_chars,
            "generation submitted"
        );
        Ok(operation)
    }

    /// Waits one poll interval, then refreshes the operation by handle.
    pub async fn poll(&self, operation: GenerationOperation) -> Result<GenerationOperation, AiError> {
        if !self.poll_interval.is_zero() {
            tokio::time::sleep(self.poll_interval).await;
        }
        let credential = self.gate.active_credential()?;
        let handle = operation.handle;
        match self.provider.fetch_operation(credential, handle.clone()).await {
            Ok(refreshed) => {
                debug!(handle = %handle, done = refreshed.done, "generation polled");
                Ok(refreshed)
            }
            Err(error) => Err(self.escalate(error).await),
        }
    }

    pub async fn wait_for_completion(
        &self,
        mut operation: GenerationOperation,
    ) -> Result<GenerationOperation, AiError> {
        let mut attempts = 0u32;
        while !operation.done {
            if let Some(max_attempts) = self.max_poll_attempts {
                if attempts >= max_attempts {
                    return Err(AiError::generation_failed(format!(
                        "operation {} still running after {attempts} polls",
                        operation.handle
                    )));
                }
            }
            operation = self.poll(operation).await?;
            attempts += 1;
        }
        info!(handle = %operation.handle, polls = attempts, "generation finished");
        Ok(operation)
    }

    /// Consumes a finished operation. A done operation without a result URI is
    /// a failure, never an empty success.
    pub async fn extract_result(
        &self,
        operation: GenerationOperation,
        credential: &Credential,
    ) -> Result<GeneratedVideo, AiError> {
        if !operation.done {
            return Err(AiError::generation_failed(format!(
                "operation {} has not finished",
                operation.handle
            )));
        }

        if let Some(failure) = operation.failure {
            let error = AiError::new(AiErrorCode::ProviderProtocol, failure.message)
                .with_details(json!({ "operationCode": failure.code }));
            return Err(self.escalate(error).await);
        }

        let uri = operation
            .result_uri
            .filter(|uri| !uri.trim().is_empty())
            .ok_or_else(|| AiError::generation_failed("Failed to generate video URI"))?;

        Ok(GeneratedVideo {
            locator: compose_locator(&uri, credential.token()),
        })
    }

    async fn escalate(&self, error: AiError) -> AiError {
        if !error.is_provider_failure() {
            return error;
        }

        match self.classifier.classify(&error.message) {
            ErrorClass::SessionExpired => {
                warn!("provider reports a stale credential: {}", error.message);
                self.gate.request_credential().await;
                AiError::new(
                    AiErrorCode::SessionExpired,
                    format!("API key session expired or invalid: {}", error.message),
                )
            }
            ErrorClass::Generic => {
                let details = json!({ "providerCode": error.code });
                AiError::generation_failed(error.message).with_details(details)
            }
        }
    }
}

pub(crate) fn compose_locator(uri: &str, token: &str) -> String {
    let separator = if uri.contains('?') { '&' } else { '?' };
    format!("{uri}{separator}key={token}")
}
