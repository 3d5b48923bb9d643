use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use deckhand::defaults;
use deckhand::deployment;
use deckhand::manifest::{self, RenderOptions, RenderedManifest};
use deckhand::utils::io;

use super::CmdResult;

#[derive(Args)]
pub struct RenderArgs {
    /// Deployment config file (.json, .yaml, .yml or .toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override a config field (repeatable), e.g. --set image_tag=gcr.io/p/app:v2
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = super::parse_key_val)]
    set: Vec<(String, String)>,

    /// Template to render instead of the built-in manifest
    #[arg(long)]
    template: Option<PathBuf>,

    /// Write the manifest to a file and print a JSON summary instead
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
pub struct RenderOutput {
    command: String,
    path: String,
    bytes: usize,
    #[serde(flatten)]
    manifest: RenderedManifest,
}

/// Without `--output` the manifest itself goes to stdout.
pub fn is_raw(args: &RenderArgs) -> bool {
    args.output.is_none()
}

pub fn run(args: RenderArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<RenderOutput> {
    let Some(output) = args.output.clone() else {
        return Err(deckhand::Error::validation_missing_argument(vec![
            "--output".to_string(),
        ]));
    };

    let rendered = build(&args)?;
    io::write_file_atomic(
        &output,
        &rendered.content,
        &format!("write {}", output.display()),
    )?;
    deckhand::log_status!("render", "Wrote {}", output.display());

    Ok((
        RenderOutput {
            command: "render".to_string(),
            path: output.display().to_string(),
            bytes: rendered.content.len(),
            manifest: rendered,
        },
        0,
    ))
}

pub fn run_raw(args: RenderArgs) -> deckhand::Result<(String, i32)> {
    let rendered = build(&args)?;
    Ok((rendered.content, 0))
}

fn build(args: &RenderArgs) -> deckhand::Result<RenderedManifest> {
    let render_defaults = defaults::load_defaults().render;

    let template = super::path_or_configured(
        args.template.clone(),
        render_defaults.template_path.as_deref(),
    )
    .map(|path| io::read_file(&path, &format!("read template {}", path.display())))
    .transpose()?;

    let config = deployment::load(args.config.as_deref(), &args.set)?;

    manifest::render(
        &config,
        &RenderOptions {
            template,
            cloudsql_proxy_image: render_defaults.cloudsql_proxy_image,
        },
    )
}
