use anyhow::{bail, Context, Result};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, Row, Table};
use logsnip_client::config::load_config;
use logsnip_client::{crypto, DispatchOutcome, Metadata, Pipeline, SendOptions, SnippetType};
use owo_colors::OwoColorize;
use serde_json::Value;
use tracing::debug;

use crate::logging::Logging;

pub struct SendArgs {
    pub payload: String,
    pub project: Option<String>,
    pub kind: Option<SnippetType>,
    pub json: bool,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub all: bool,
}

fn open_pipeline(logging: &Logging) -> Result<Pipeline> {
    match load_config()? {
        Some(loaded) => {
            logging.apply_config(&loaded.config);
            debug!(source = %loaded.source, "Configuration loaded");
            Ok(Pipeline::with_config(loaded.config))
        }
        None => Ok(Pipeline::disabled()),
    }
}

fn parse_payload(raw: &str, json: bool) -> Result<Value> {
    if json {
        serde_json::from_str(raw).context("Payload is not valid JSON")
    } else {
        Ok(Value::String(raw.to_string()))
    }
}

pub async fn cmd_send(logging: &Logging, args: SendArgs) -> Result<()> {
    let payload = parse_payload(&args.payload, args.json)?;
    let mut pipeline = open_pipeline(logging)?;

    let options = SendOptions {
        project: args.project,
        kind: args.kind,
    };
    let metadata = Metadata {
        file_name: args.file,
        line_number: args.line,
        ..Metadata::default()
    };

    if args.all {
        pipeline.send_to_all(payload, options, metadata);
    } else {
        pipeline.send(payload, options, metadata);
    }

    if !pipeline.is_enabled() {
        println!("{} {}", "!".yellow(), "No configuration found - logsnip disabled".yellow());
        if let Some(path) = pipeline.fallback_log().path() {
            println!("   Payload written to {}", path.display());
        }
        return Ok(());
    }

    match pipeline.flush().await {
        DispatchOutcome::Delivered(count) => {
            println!("{} Delivered {} snippet(s)", "✓".green(), count);
            Ok(())
        }
        DispatchOutcome::Empty => {
            println!(
                "{} Nothing sent: no API key configured for the target project",
                "!".yellow()
            );
            Ok(())
        }
        DispatchOutcome::Dropped(count) => {
            bail!("Delivery failed, {} snippet(s) dropped", count)
        }
    }
}

pub fn cmd_status(logging: &Logging) -> Result<()> {
    println!();
    println!("{} {}", "▸".bright_cyan(), "logsnip Status".bright_cyan().bold());
    println!();

    let Some(loaded) = load_config()? else {
        println!("{} {}", "✗".bright_red(), "No configuration found - logsnip disabled".red());
        println!();
        println!("   Create {} to get started", "logsnip.toml".bright_white());
        return Ok(());
    };
    logging.apply_config(&loaded.config);
    let config = &loaded.config;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);

    let ca_bundle = match &config.ca_bundle {
        Some(path) if path.exists() => format!("{} (verifying endpoint)", path.display()),
        Some(path) => format!("{} (missing, endpoint NOT verified)", path.display()),
        None => "none (endpoint NOT verified)".to_string(),
    };
    let context = if config.is_context_enabled {
        format!("{} lines around the call site", config.context_size * 2)
    } else {
        "disabled".to_string()
    };

    for (label, value) in [
        ("Configuration", loaded.source.to_string()),
        ("Client UUID", config.client_uuid.clone()),
        ("Default project", config.default_project.clone()),
        ("API address", config.api_address.clone()),
        ("CA bundle", ca_bundle),
        ("Capture", format!("{:?}", config.capture_method).to_lowercase()),
        ("Context", context),
    ] {
        table.add_row(Row::from(vec![
            Cell::new(label).fg(Color::Cyan),
            Cell::new(value).fg(Color::White),
        ]));
    }
    println!("{table}");

    if config.projects.is_empty() {
        println!();
        println!("{} {}", "!".yellow(), "No projects configured, nothing will be sent".yellow());
        return Ok(());
    }

    let mut projects = Table::new();
    projects.load_preset(UTF8_FULL);
    projects.set_header(vec!["Project", "API key", "Encrypted"]);
    for (name, settings) in &config.projects {
        let key = if settings.api_key.is_some() {
            Cell::new("✓").fg(Color::Green)
        } else {
            Cell::new("✗ (snippets rejected)").fg(Color::Red)
        };
        let encrypted = if settings.encryption_password.is_some() {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::Yellow)
        };
        projects.add_row(Row::from(vec![Cell::new(name), key, encrypted]));
    }
    println!();
    println!("{projects}");

    Ok(())
}

pub fn cmd_encrypt(text: &str, password: &str) -> Result<()> {
    println!("{}", crypto::encrypt(text.as_bytes(), password)?);
    Ok(())
}

pub fn cmd_decrypt(text: &str, password: &str) -> Result<()> {
    let plaintext = crypto::decrypt_to_string(text.trim(), password)
        .context("Could not decrypt input (wrong password?)")?;
    println!("{}", plaintext);
    Ok(())
}
