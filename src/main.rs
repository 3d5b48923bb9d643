use clap::{CommandFactory, Parser, Subcommand};

use commands::GlobalArgs;

#[derive(Debug, Clone, Copy)]
enum ResponseMode {
    Json,
    Raw,
}

mod commands;
mod output;
mod tty;

use commands::{cleanup, config, pipeline, render};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "deckhand")]
#[command(version = VERSION)]
#[command(about = "Render Kubernetes manifests and run the CI pipeline for a Cloud SQL backed app")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the Kubernetes manifest for a deployment config
    Render(render::RenderArgs),
    /// List, plan or run CI pipeline stages
    Pipeline(pipeline::PipelineArgs),
    /// Find and delete expired test resources
    Cleanup(cleanup::CleanupArgs),
    /// Manage global deckhand configuration
    Config(config::ConfigArgs),
    /// List available commands (alias for --help)
    List,
}

fn response_mode(command: &Commands) -> ResponseMode {
    match command {
        Commands::Render(args) if render::is_raw(args) => ResponseMode::Raw,
        Commands::List => ResponseMode::Raw,
        _ => ResponseMode::Json,
    }
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let global = GlobalArgs {};

    if matches!(cli.command, Commands::List) {
        if let Err(e) = Cli::command().print_help() {
            eprintln!("Failed to print help: {}", e);
            return std::process::ExitCode::FAILURE;
        }
        println!();
        return std::process::ExitCode::SUCCESS;
    }

    let (json_result, exit_code) = match response_mode(&cli.command) {
        ResponseMode::Raw => match commands::run_raw(cli.command, &global) {
            Ok((content, exit_code)) => {
                print!("{}", content);
                return std::process::ExitCode::from(exit_code_to_u8(exit_code));
            }
            Err(err) => {
                let exit_code = output::exit_code_for_error(err.code);
                (Err(err), exit_code)
            }
        },
        ResponseMode::Json => commands::run_json(cli.command, &global),
    };

    if let Err(e) = output::emit(&json_result) {
        eprintln!("{}", e);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
