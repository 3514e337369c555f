use std::sync::Arc;

use clap::Args;
use classhub_ai::{
    ChatEvent, ChatSession, ConversationHistory, ConversationTurn, CredentialSource,
    GeminiProvider, GenAiProviderRef,
};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::config::RuntimeConfig;

pub const GREETING: &str =
    "你好！我是24数媒1班的 AI 助教。我可以帮你解答课程问题、提供设计灵感或编写代码。有什么我可以帮你的吗？";
pub const FALLBACK_REPLY: &str = "抱歉，我现在遇到了一些连接问题，请稍后再试。";

#[derive(Args, Debug, Clone, Default)]
pub struct ChatArgs {
    /// Send one message, print the reply and exit.
    #[arg(long, short)]
    pub message: Option<String>,
}

pub async fn run_chat(args: ChatArgs, config: &RuntimeConfig) -> Result<(), String> {
    let provider: GenAiProviderRef = Arc::new(GeminiProvider::new(config.gemini.clone()));
    let session = ChatSession::new(provider, CredentialSource::new(config.api_key.clone()));
    let mut history: ConversationHistory = vec![ConversationTurn::model(GREETING)];
    let mut stdout = tokio::io::stdout();

    if let Some(message) = args.message {
        return exchange(&session, &mut history, &message, &mut stdout).await;
    }

    write_text(&mut stdout, &format!("{GREETING}\n")).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        write_text(&mut stdout, "> ").await?;
        let Some(line) = lines
            .next_line()
            .await
            .map_err(|error| format!("read stdin failed: {error}"))?
        else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "/exit" | "/quit") {
            break;
        }
        exchange(&session, &mut history, line, &mut stdout).await?;
    }
    info!(turns = history.len(), "chat ended");
    Ok(())
}

/// Sends one message and prints the streamed reply. A failed reply keeps the
/// fragments already shown and adds the fallback turn.
async fn exchange<W>(
    session: &ChatSession,
    history: &mut ConversationHistory,
    message: &str,
    out: &mut W,
) -> Result<(), String>
where
    W: AsyncWrite + Unpin,
{
    let mut stream = session
        .send_message(history, message)
        .map_err(|error| error.to_string())?;
    history.push(ConversationTurn::user(message));

    let mut partial = String::new();
    while let Some(event) = stream.next().await {
        match event {
            ChatEvent::Fragment(fragment) => {
                write_text(out, &fragment).await?;
                partial.push_str(&fragment);
            }
            ChatEvent::Done(reply) => {
                history.push(ConversationTurn::model(reply.text));
            }
            ChatEvent::Error(error) => {
                warn!(code = ?error.code, "chat reply failed: {}", error.message);
                if !partial.is_empty() {
                    history.push(ConversationTurn::model(std::mem::take(&mut partial)));
                    write_text(out, "\n").await?;
                }
                write_text(out, FALLBACK_REPLY).await?;
                history.push(ConversationTurn::model(FALLBACK_REPLY));
            }
        }
    }
    write_text(out, "\n").await
}

async fn write_text<W>(out: &mut W, text: &str) -> Result<(), String>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(text.as_bytes())
        .await
        .map_err(|error| format!("write stdout failed: {error}"))?;
    out.flush()
        .await
        .map_err(|error| format!("write stdout failed: {error}"))
}
