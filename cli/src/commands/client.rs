use std::io::Write;

use anyhow::Context;
use executor_core::tokio::TokioGlobal;
use futures_lite::StreamExt;

use perimeter::{
    ClientConfig, ClientEndpoint, Command, SocketDirectory, StatusLine, StatusView, Tone,
};

use crate::cli::ClientArgs;
use crate::commands::stdin_lines;
use crate::error::CliResult;

/// Prints status lines to stdout
struct ConsoleView {
    json: bool,
}

impl StatusView for ConsoleView {
    fn show(&self, status: &StatusLine) -> perimeter::Result<()> {
        let line = if self.json {
            serde_json::to_string(status)
                .map_err(|e| perimeter::Error::Display(e.to_string()))?
        } else {
            match status.tone {
                Tone::Alert => format!("[ALERT] {}", status.text),
                Tone::Normal => status.text.clone(),
            }
        };
        writeln!(std::io::stdout().lock(), "{line}")
            .map_err(|e| perimeter::Error::Display(e.to_string()))
    }
}

pub async fn execute(args: ClientArgs, config: ClientConfig) -> CliResult<()> {
    let discovery = SocketDirectory::new(config.channel().socket_dir());
    let client = ClientEndpoint::connect(
        &config,
        &discovery,
        TokioGlobal,
        ConsoleView { json: args.json },
    )
    .await;

    let mut lines = stdin_lines();
    while let Some(line) = lines.next().await {
        let line = line.context("failed to read stdin")?;
        let command = match line.trim() {
            "" => continue,
            "on" => Command::TurnOn,
            "off" => Command::TurnOff,
            "quit" | "exit" => break,
            other => {
                eprintln!("unknown input `{other}` (expected on, off or quit)");
                continue;
            }
        };
        client.send_command(command).await;
    }

    let connected = client.is_connected();
    client.close();
    if connected {
        Ok(())
    } else {
        Err(perimeter::Error::NotConnected)
            .context("session ended without a connection to the service")
    }
}
