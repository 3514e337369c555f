use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use classhub_ai::{
    AiError, AiErrorCode, Credential, CredentialCapability, CredentialGate, CredentialPolicy,
    CredentialSource, GeminiProvider, GenerationPipeline, HostFuture, ImageInput,
    PhraseClassifier,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::config::RuntimeConfig;

const SESSION_EXPIRED_MESSAGE: &str = "API Key 会话过期或无效。请重新选择 API Key 后重试。";
const GENERATION_FAILED_PREFIX: &str = "生成视频时出错。请检查您的 API Key 额度或重试。 ";
const KEY_REQUIRED_MESSAGE: &str = "需要先选择 API Key 才能生成视频。";

#[derive(Args, Debug, Clone)]
pub struct AnimateArgs {
    /// Still image to animate.
    pub image: PathBuf,
    /// Motion description; a cinematic default is used when omitted.
    #[arg(long)]
    pub prompt: Option<String>,
    /// Override the MIME type guessed from the file extension.
    #[arg(long)]
    pub mime: Option<String>,
}

pub async fn run_animate(args: AnimateArgs, config: &RuntimeConfig) -> Result<(), String> {
    let bytes = fs::read(&args.image)
        .map_err(|error| format!("read {} failed: {error}", args.image.display()))?;
    let mime_type = args
        .mime
        .clone()
        .or_else(|| guess_image_mime(&args.image).map(str::to_string))
        .ok_or_else(|| {
            format!(
                "cannot tell the image type of {}; pass --mime",
                args.image.display()
            )
        })?;
    let prompt = args.prompt.unwrap_or_default();

    let source = CredentialSource::new(config.api_key.clone());
    let gate = terminal_gate(source.clone(), config.credential_policy);
    let classifier =
        PhraseClassifier::default().with_extra_phrases(config.expired_phrases.iter().cloned());
    let pipeline = GenerationPipeline::new(
        Arc::new(GeminiProvider::new(config.gemini.clone())),
        Arc::new(gate),
    )
    .with_classifier(Arc::new(classifier))
    .with_poll_interval(config.poll_interval)
    .with_max_poll_attempts(config.max_poll_attempts);

    // A key picked at the prompt gets one resubmission, like pressing generate again.
    let mut resubmitted = false;
    loop {
        let prompts_before = pipeline.gate().prompt_count();
        eprintln!("正在生成视频，这可能需要几分钟...");
        let result = pipeline
            .generate(ImageInput::new(bytes.clone(), mime_type.as_str()), &prompt)
            .await;
        match result {
            Ok(video) => {
                info!(image = %args.image.display(), "video ready");
                println!("{}", video.locator);
                return Ok(());
            }
            Err(error) => {
                let reprompted = pipeline.gate().prompt_count() > prompts_before;
                if !resubmitted && reprompted && source.has_selection() {
                    if error.code == AiErrorCode::SessionExpired {
                        eprintln!("{SESSION_EXPIRED_MESSAGE}");
                    }
                    resubmitted = true;
                    continue;
                }
                return Err(localized_error(&error));
            }
        }
    }
}

fn localized_error(error: &AiError) -> String {
    match error.code {
        AiErrorCode::SessionExpired => SESSION_EXPIRED_MESSAGE.to_string(),
        AiErrorCode::CredentialMissing => KEY_REQUIRED_MESSAGE.to_string(),
        AiErrorCode::UserInputInvalid => error.message.clone(),
        _ => format!("{GENERATION_FAILED_PREFIX}{}", error.message),
    }
}

/// The terminal has no way to ask whether a key was picked, so the configured
/// policy decides; picking a key reads one from stdin.
fn terminal_gate(source: CredentialSource, policy: CredentialPolicy) -> CredentialGate {
    CredentialGate::new(terminal_capability(source.clone()), source).with_policy(policy)
}

fn terminal_capability(source: CredentialSource) -> CredentialCapability {
    CredentialCapability {
        has_selected: None,
        open_selection: Some(Arc::new(move || -> HostFuture<()> {
            let source = source.clone();
            Box::pin(async move {
                eprint!("请输入 Gemini API Key: ");
                let _ = std::io::stderr().flush();
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                match lines.next_line().await {
                    Ok(Some(line)) => match Credential::new(line) {
                        Some(credential) => source.select(credential),
                        None => eprintln!("未输入 API Key。"),
                    },
                    Ok(None) | Err(_) => eprintln!("未输入 API Key。"),
                }
            })
        })),
    }
}

fn guess_image_mime(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_is_guessed_from_extension() {
        assert_eq!(guess_image_mime(Path::new("cat.PNG")), Some("image/png"));
        assert_eq!(guess_image_mime(Path::new("/tmp/a.jpeg")), Some("image/jpeg"));
        assert_eq!(guess_image_mime(Path::new("notes.pdf")), None);
        assert_eq!(guess_image_mime(Path::new("no-extension")), None);
    }

    #[test]
    fn errors_are_localized_by_code() {
        let expired = AiError::new(AiErrorCode::SessionExpired, "stale");
        assert_eq!(localized_error(&expired), SESSION_EXPIRED_MESSAGE);

        let failed = AiError::generation_failed("quota exceeded");
        assert_eq!(
            localized_error(&failed),
            "生成视频时出错。请检查您的 API Key 额度或重试。 quota exceeded"
        );
    }

    fn keyless_source() -> CredentialSource {
        CredentialSource::new(None).with_env_keys(["CLASSHUB_ANIMATE_TEST_UNSET"])
    }

    #[tokio::test]
    async fn configured_policy_decides_keyless_check() {
        let fail_open = terminal_gate(keyless_source(), CredentialPolicy::FailOpen);
        let fail_closed = terminal_gate(keyless_source(), CredentialPolicy::FailClosed);

        assert!(fail_open.check_credential().await);
        assert!(!fail_closed.check_credential().await);
    }

    #[tokio::test]
    async fn fail_closed_passes_once_a_key_resolves() {
        let source = CredentialSource::new(Some("configured".to_string()))
            .with_env_keys(["CLASSHUB_ANIMATE_TEST_UNSET"]);
        let gate = terminal_gate(source, CredentialPolicy::FailClosed);
        assert!(gate.check_credential().await);
    }
}
