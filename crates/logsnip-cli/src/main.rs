use anyhow::Result;
use clap::{Parser, Subcommand};
use logsnip_client::SnippetType;

mod commands;
mod logging;

use commands::SendArgs;

#[derive(Parser)]
#[command(name = "logsnip", version, about = "logsnip CLI - send log snippets to a remote console")]
struct Cli {
    /// Print debug diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one snippet and deliver it immediately
    Send {
        payload: String,
        /// Target project (defaults to the configured default project)
        #[arg(long, short)]
        project: Option<String>,
        /// normal, success, info or error
        #[arg(long = "type", value_name = "TYPE")]
        kind: Option<SnippetType>,
        /// Parse the payload as JSON instead of sending it as a string
        #[arg(long)]
        json: bool,
        /// Report this file instead of the captured call site
        #[arg(long)]
        file: Option<String>,
        #[arg(long)]
        line: Option<u32>,
    },
    /// Send one snippet to every configured project
    SendAll {
        payload: String,
        #[arg(long = "type", value_name = "TYPE")]
        kind: Option<SnippetType>,
        #[arg(long)]
        json: bool,
    },
    /// Show the resolved configuration and client identity
    Status,
    /// Encrypt text the way snippet fields are encrypted
    Encrypt {
        text: String,
        #[arg(long)]
        password: String,
    },
    /// Decrypt an encrypted snippet field
    Decrypt {
        text: String,
        #[arg(long)]
        password: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let logging = logging::init(cli.verbose);

    match cli.cmd {
        Command::Send {
            payload,
            project,
            kind,
            json,
            file,
            line,
        } => {
            let args = SendArgs {
                payload,
                project,
                kind,
                json,
                file,
                line,
                all: false,
            };
            commands::cmd_send(&logging, args).await?
        }
        Command::SendAll { payload, kind, json } => {
            let args = SendArgs {
                payload,
                project: None,
                kind,
                json,
                file: None,
                line: None,
                all: true,
            };
            commands::cmd_send(&logging, args).await?
        }
        Command::Status => commands::cmd_status(&logging)?,
        Command::Encrypt { text, password } => commands::cmd_encrypt(&text, &password)?,
        Command::Decrypt { text, password } => commands::cmd_decrypt(&text, &password)?,
    }
    Ok(())
}
