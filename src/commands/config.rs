use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::Value;

use deckhand::config;
use deckhand::defaults::{self, DeckhandConfig, Defaults};
use deckhand::Error;

use super::CmdResult;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Display configuration (merged defaults + file)
    Show {
        /// Show only built-in defaults (ignore deckhand.json)
        #[arg(long)]
        builtin: bool,
    },
    /// Set a configuration value at a JSON pointer path
    Set {
        /// JSON pointer path (e.g., /defaults/cleanup/max_age_hours)
        pointer: String,
        /// Value to set (JSON)
        value: String,
    },
    /// Remove a configuration value at a JSON pointer path
    Remove {
        /// JSON pointer path (e.g., /defaults/render/template_path)
        pointer: String,
    },
    /// Reset configuration to built-in defaults (deletes deckhand.json)
    Reset,
    /// Show the path to deckhand.json
    Path,
}

#[derive(Debug, Default, Serialize)]
pub struct ConfigOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<DeckhandConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    defaults: Option<Defaults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<bool>,
}

impl ConfigOutput {
    fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            ..Self::default()
        }
    }
}

pub fn run(args: ConfigArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<ConfigOutput> {
    match args.command {
        ConfigCommand::Show { builtin } => show(builtin),
        ConfigCommand::Set { pointer, value } => set(&pointer, &value),
        ConfigCommand::Remove { pointer } => remove(&pointer),
        ConfigCommand::Reset => reset(),
        ConfigCommand::Path => path(),
    }
}

fn show(builtin: bool) -> CmdResult<ConfigOutput> {
    let output = if builtin {
        ConfigOutput {
            defaults: Some(defaults::builtin_defaults()),
            ..ConfigOutput::new("config.show")
        }
    } else {
        ConfigOutput {
            config: Some(defaults::read_config()?),
            ..ConfigOutput::new("config.show")
        }
    };
    Ok((output, 0))
}

/// Apply `edit` to deckhand.json as JSON, check it still parses, then save.
/// A malformed deckhand.json is reported, never overwritten.
fn edit_config<F>(pointer: &str, edit: F) -> deckhand::Result<DeckhandConfig>
where
    F: FnOnce(&mut Value) -> deckhand::Result<()>,
{
    if !pointer.starts_with('/') {
        return Err(Error::validation_invalid_argument(
            "pointer",
            "JSON pointer must start with '/'",
            None,
            None,
        ));
    }

    let mut config_json = serde_json::to_value(defaults::read_config()?).map_err(|e| {
        Error::internal_unexpected(format!("Failed to serialize config: {}", e))
    })?;

    edit(&mut config_json)?;

    let config: DeckhandConfig = serde_json::from_value(config_json).map_err(|e| {
        Error::validation_invalid_json(e, Some("deserialize config".to_string()), None)
    })?;
    defaults::save_config(&config)?;
    Ok(config)
}

fn set(pointer: &str, value_str: &str) -> CmdResult<ConfigOutput> {
    let value: Value = serde_json::from_str(value_str).map_err(|e| {
        Error::validation_invalid_json(
            e,
            Some("parse value".to_string()),
            Some(value_str.chars().take(200).collect::<String>()),
        )
    })?;

    let updated = edit_config(pointer, |json| {
        config::set_json_pointer(json, pointer, value.clone())
    })?;

    Ok((
        ConfigOutput {
            config: Some(updated),
            pointer: Some(pointer.to_string()),
            value: Some(value),
            ..ConfigOutput::new("config.set")
        },
        0,
    ))
}

fn remove(pointer: &str) -> CmdResult<ConfigOutput> {
    let updated = edit_config(pointer, |json| config::remove_json_pointer(json, pointer))?;

    Ok((
        ConfigOutput {
            config: Some(updated),
            pointer: Some(pointer.to_string()),
            ..ConfigOutput::new("config.remove")
        },
        0,
    ))
}

fn reset() -> CmdResult<ConfigOutput> {
    let deleted = defaults::reset_config()?;

    Ok((
        ConfigOutput {
            defaults: Some(defaults::builtin_defaults()),
            path: Some(defaults::config_path()?),
            deleted: Some(deleted),
            ..ConfigOutput::new("config.reset")
        },
        0,
    ))
}

fn path() -> CmdResult<ConfigOutput> {
    Ok((
        ConfigOutput {
            path: Some(defaults::config_path()?),
            exists: Some(defaults::config_exists()),
            ..ConfigOutput::new("config.path")
        },
        0,
    ))
}
