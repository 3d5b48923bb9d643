use std::path::PathBuf;

use chrono::Utc;
use clap::Args;
use serde::Serialize;

use deckhand::cleanup::{self, CleanupPlan, DeleteCommand, DeleteResult};
use deckhand::credentials;
use deckhand::defaults;
use deckhand::stage_executor::ShellStageExecutor;
use deckhand::Error;

use super::CmdResult;

#[derive(Args)]
pub struct CleanupArgs {
    /// JSON resource listing, e.g. from `gcloud container clusters list --format=json`
    #[arg(long)]
    input: PathBuf,

    /// Delete resources older than this many hours
    #[arg(long)]
    max_age_hours: Option<i64>,

    /// Command run per expired resource; `{{ name }}` and `{{ kind }}` are substituted
    #[arg(long, value_name = "TEMPLATE")]
    delete_command: Option<String>,

    /// Run the delete commands (otherwise only report them)
    #[arg(long)]
    execute: bool,
}

#[derive(Serialize)]
pub struct CleanupOutput {
    command: String,
    plan: CleanupPlan,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    delete_commands: Vec<DeleteCommand>,
    executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<Vec<DeleteResult>>,
}

pub fn run(args: CleanupArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<CleanupOutput> {
    let defaults = defaults::load_defaults();

    if args.execute && args.delete_command.is_none() {
        return Err(Error::validation_missing_argument(vec![
            "--delete-command".to_string(),
        ]));
    }

    let resources = cleanup::load_resources(&args.input)?;
    let max_age_hours = args.max_age_hours.unwrap_or(defaults.cleanup.max_age_hours);
    let plan = cleanup::plan(resources, Utc::now(), max_age_hours)?;

    for name in &plan.unparseable {
        deckhand::log_status!("cleanup", "Keeping {}: creation time is not RFC 3339", name);
    }

    let delete_commands = match &args.delete_command {
        Some(template) => cleanup::delete_commands(&plan, template)?,
        None => Vec::new(),
    };

    if !args.execute {
        return Ok((
            CleanupOutput {
                command: "cleanup".to_string(),
                plan,
                delete_commands,
                executed: false,
                results: None,
            },
            0,
        ));
    }

    let cloud = credentials::resolve(&defaults.credentials, credentials::process_env)?;
    let executor = ShellStageExecutor::from_config(&defaults.pipeline)?;
    let results = cleanup::execute(&delete_commands, &executor, &cloud.env(&defaults.credentials));
    let exit_code = if results.iter().all(|r| r.success) { 0 } else { 1 };

    Ok((
        CleanupOutput {
            command: "cleanup".to_string(),
            plan,
            delete_commands,
            executed: true,
            results: Some(results),
        },
        exit_code,
    ))
}
