mod cli;
mod config;

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use notify_engine::settings::SqlitePreferenceStore;
use notify_engine::{NotificationEngine, NotificationInput, SettingsPatch};
use serde_json::{Map, Value, json};
use tracing::{error, info};

use crate::cli::{Args, Commands};
use crate::config::CliConfig;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let logging = notify_engine::logging::init_logging(args.log_format, args.log_directive())?;

    let config = CliConfig::load(args.config.as_deref())?;
    if args.log_directive().is_none()
        && let Some(filter) = &config.log_filter
    {
        logging
            .set_filter(filter)
            .with_context(|| format!("Invalid log_filter '{}'", filter))?;
    }
    let store = SqlitePreferenceStore::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open settings database {}", config.database_url))?;
    let engine = NotificationEngine::from_config(&config.engine, Arc::new(store))?;

    let result = execute(&engine, args.command).await;
    engine.shutdown();
    result
}

async fn execute(engine: &NotificationEngine, command: Commands) -> Result<()> {
    match command {
        Commands::Send {
            category,
            title,
            body,
            priority,
            id,
            actions,
            data,
        } => {
            let data = match data {
                Some(raw) => serde_json::from_str::<Map<String, Value>>(&raw)
                    .context("--data must be a JSON object")?,
                None => Map::new(),
            };
            let input = NotificationInput {
                id,
                category: Some(category),
                priority,
                actions: (!actions.is_empty()).then_some(actions),
                data,
                ..NotificationInput::new(title, body)
            };

            let delivered = engine.send_notification(input).await;
            let stats = engine.stats();
            if delivered.is_none() && stats.queue_depth > 0 {
                // The queue is in-memory and ends with this process.
                eprintln!("Notification queued but the engine is {}; it will not be delivered", stats.state);
            }
            print_json(&json!({
                "delivered": delivered.is_some(),
                "id": delivered,
                "state": stats.state,
                "queue_depth": stats.queue_depth,
            }))
        }
        Commands::Stats => {
            engine.initialize().await;
            print_json(&engine.stats())
        }
        Commands::Test => {
            let id = engine.send_test_notification().await;
            print_json(&json!({
                "delivered": id.is_some(),
                "id": id,
                "state": engine.state(),
            }))
        }
        Commands::Settings {
            alerts,
            info,
            sound,
            vibrate,
            badge,
        } => {
            let patch = SettingsPatch {
                alerts,
                info,
                sound,
                vibrate,
                badge,
            };
            let settings = if patch.is_empty() {
                engine.load_settings().await
            } else {
                let updated = engine.update_settings(patch).await;
                info!(?updated, "Notification settings saved");
                updated
            };
            print_json(&settings)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
