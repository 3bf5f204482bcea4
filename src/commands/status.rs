//! Read-only commands: status and show.

use chrono::{DateTime, Local};
use clap::Args;
use docsync_core::record::{decode_record, UPDATED_AT_FIELD};
use docsync_core::{document_path, DocumentStore, Fields, WritingMode};

use super::{open_store, CommandError};
use crate::config::Config;

/// Show the configured user and each remote document
#[derive(Debug, Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        println!("Sync Status");
        println!("===========");
        println!();
        println!("Data dir: {}", config.data_dir.value.display());
        println!(
            "Sync:     {}",
            if config.sync.enabled.value {
                "enabled"
            } else {
                "disabled"
            }
        );

        let user_id = match &config.user_id.value {
            Some(user_id) => user_id.clone(),
            None => {
                println!("User:     (not signed in)");
                println!();
                println!("Set user_id in your config file or DOCSYNC_USER.");
                return Ok(());
            }
        };
        println!("User:     {}", user_id);
        println!();

        let store = open_store(config);
        for mode in WritingMode::ALL {
            let path = document_path(&user_id, mode)?;
            let snapshot = store.read(&path).await?;
            println!("  {:<8} {}", mode, summarize(snapshot.fields.as_ref()));
        }

        Ok(())
    }
}

/// Print a document's remote text
#[derive(Debug, Args)]
pub struct ShowCommand {
    /// Document to show (editor or todo)
    pub mode: WritingMode,
}

impl ShowCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let user_id = config.require_user()?;
        let path = document_path(&user_id, self.mode)?;
        let snapshot = open_store(config).read(&path).await?;

        match decode_record(snapshot.fields.as_ref()).text {
            Some(text) => println!("{}", text),
            None => eprintln!("No {} document yet.", self.mode),
        }
        Ok(())
    }
}

fn summarize(fields: Option<&Fields>) -> String {
    if fields.is_none() {
        return "(absent)".to_string();
    }
    let record = decode_record(fields);
    let length = record
        .text
        .as_deref()
        .map(|t| format!("{} chars", t.chars().count()))
        .unwrap_or_else(|| "no text".to_string());
    let updated = fields
        .and_then(|f| f.get(UPDATED_AT_FIELD))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| {
            t.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        });

    match updated {
        Some(updated) => format!("rev {}, {}, updated {}", record.revision, length, updated),
        None => format!("rev {}, {}", record.revision, length),
    }
}
