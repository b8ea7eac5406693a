//! Polling messenger over stdin/stdout: one line in, one turn, one
//! response out. Useful for local script development and demos.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::error;
use uuid::Uuid;

use prompter_core::Message;
use prompter_engine::{MessengerInterface, Pipeline};

pub struct TerminalInterface {
    prompt: String,
    dialog_id: String,
}

impl TerminalInterface {
    /// A fresh dialog per process run.
    pub fn new() -> Self {
        Self {
            prompt: "> ".to_string(),
            dialog_id: Uuid::new_v4().to_string(),
        }
    }

    /// Resume (or share) a specific dialog id across runs.
    pub fn with_dialog_id(mut self, dialog_id: impl Into<String>) -> Self {
        self.dialog_id = dialog_id.into();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn dialog_id(&self) -> &str {
        &self.dialog_id
    }
}

impl Default for TerminalInterface {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessengerInterface for TerminalInterface {
    fn name(&self) -> &str {
        "terminal"
    }

    /// Read lines until EOF or `/quit`, running one turn per line.
    ///
    /// Turn errors are reported and the loop continues; the dialog stays
    /// at its previous turn, so the user can simply retry.
    async fn connect(&self, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        stdout.write_all(self.prompt.as_bytes()).await?;
        stdout.flush().await?;

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line == "/quit" {
                break;
            }
            if !line.is_empty() {
                match pipeline
                    .run_turn_as(Some(self.name()), Message::text(line), &self.dialog_id)
                    .await
                {
                    Ok(response) => {
                        let text = response.text.as_deref().unwrap_or("");
                        stdout.write_all(text.as_bytes()).await?;
                        stdout.write_all(b"\n").await?;
                    }
                    Err(err) => {
                        error!(error = %err, "turn failed");
                        stdout.write_all(b"(error, see logs)\n").await?;
                    }
                }
            }
            stdout.write_all(self.prompt.as_bytes()).await?;
            stdout.flush().await?;
        }
        Ok(())
    }
}
