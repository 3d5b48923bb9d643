use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;

use deckhand::credentials::{self, CloudEnv};
use deckhand::defaults::{self, Defaults};
use deckhand::pipeline::{self, PipelineDefinition, PipelinePlan, PipelineRunResult, PipelineStage, RunOptions};
use deckhand::stage_executor::{DryRunExecutor, ShellStageExecutor, StageExecutor};
use deckhand::Error;

use super::CmdResult;

#[derive(Args)]
pub struct PipelineArgs {
    #[command(subcommand)]
    command: PipelineCommand,
}

#[derive(Args)]
struct DefinitionArgs {
    /// Pipeline definition file (defaults to the built-in CI pipeline)
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum PipelineCommand {
    /// List the stages of the pipeline
    List {
        #[command(flatten)]
        definition: DefinitionArgs,
    },
    /// Show the stages that would run, in order
    Plan {
        #[command(flatten)]
        definition: DefinitionArgs,
        /// Only these stages (repeatable); dependencies are not pulled in
        #[arg(long = "stage", value_name = "NAME")]
        stages: Vec<String>,
    },
    /// Run the pipeline
    Run {
        #[command(flatten)]
        definition: DefinitionArgs,
        /// Only these stages (repeatable); dependencies are not pulled in
        #[arg(long = "stage", value_name = "NAME")]
        stages: Vec<String>,
        /// Skip all remaining stages after the first failure
        #[arg(long)]
        fail_fast: bool,
        /// Report what would run without executing anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Serialize)]
pub struct PipelineOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stages: Option<Vec<PipelineStage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan: Option<PipelinePlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<PipelineRunResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credentials: Option<CloudEnv>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    dry_run: bool,
}

impl PipelineOutput {
    fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            stages: None,
            plan: None,
            run: None,
            credentials: None,
            dry_run: false,
        }
    }
}

pub fn run(args: PipelineArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<PipelineOutput> {
    let defaults = defaults::load_defaults();

    match args.command {
        PipelineCommand::List { definition } => {
            let definition = load_definition(definition, &defaults)?;
            Ok((
                PipelineOutput {
                    stages: Some(definition.stages),
                    ..PipelineOutput::new("pipeline.list")
                },
                0,
            ))
        }
        PipelineCommand::Plan { definition, stages } => {
            let definition = load_definition(definition, &defaults)?;
            Ok((
                PipelineOutput {
                    plan: Some(pipeline::plan(&definition, &stages)?),
                    ..PipelineOutput::new("pipeline.plan")
                },
                0,
            ))
        }
        PipelineCommand::Run {
            definition,
            stages,
            fail_fast,
            dry_run,
        } => {
            let definition = load_definition(definition, &defaults)?;
            execute(&definition, &stages, fail_fast, dry_run, &defaults)
        }
    }
}

fn load_definition(args: DefinitionArgs, defaults: &Defaults) -> deckhand::Result<PipelineDefinition> {
    let path = super::path_or_configured(args.file, defaults.pipeline.definition_path.as_deref());
    pipeline::load(path.as_deref())
}

fn execute(
    definition: &PipelineDefinition,
    selection: &[String],
    fail_fast: bool,
    dry_run: bool,
    defaults: &Defaults,
) -> CmdResult<PipelineOutput> {
    let plan = pipeline::plan(definition, selection)?;

    // Dry runs never touch the credential file.
    let cloud = if dry_run {
        CloudEnv::default()
    } else {
        credentials::resolve(&defaults.credentials, credentials::process_env)?
    };
    for warning in &cloud.warnings {
        deckhand::log_status!("credentials", "{}", warning);
    }

    let needs_credentials = plan.requires_credentials();
    if !dry_run && !needs_credentials.is_empty() && !cloud.has_credentials() {
        return Err(Error::credentials_missing(
            needs_credentials,
            vec![
                defaults.credentials.blob_var.clone(),
                defaults.credentials.path_var.clone(),
            ],
        ));
    }

    let options = RunOptions {
        fail_fast,
        env: cloud.env(&defaults.credentials),
    };

    let executor: Box<dyn StageExecutor> = if dry_run {
        Box::new(DryRunExecutor)
    } else {
        Box::new(ShellStageExecutor::from_config(&defaults.pipeline)?)
    };

    let result = pipeline::run(&plan, executor.as_ref(), &options);
    let exit_code = result.exit_code();

    Ok((
        PipelineOutput {
            run: Some(result),
            credentials: (cloud.has_credentials() || cloud.project_id.is_some()).then_some(cloud),
            dry_run,
            ..PipelineOutput::new("pipeline.run")
        },
        exit_code,
    ))
}
