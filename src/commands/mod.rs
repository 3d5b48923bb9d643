use std::path::PathBuf;

pub type CmdResult<T> = deckhand::Result<(T, i32)>;

pub(crate) struct GlobalArgs {}

/// Parse a `KEY=VALUE` flag. Everything after the first `=` is the value.
pub(crate) fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// A path from the command line, else one configured in deckhand.json.
pub(crate) fn path_or_configured(arg: Option<PathBuf>, configured: Option<&str>) -> Option<PathBuf> {
    arg.or_else(|| configured.map(deckhand::paths::expand))
}

pub mod cleanup;
pub mod config;
pub mod pipeline;
pub mod render;

pub(crate) fn run_raw(
    command: crate::Commands,
    _global: &GlobalArgs,
) -> deckhand::Result<(String, i32)> {
    match command {
        crate::Commands::Render(args) => render::run_raw(args),
        _ => Err(deckhand::Error::validation_invalid_argument(
            "output_mode",
            "Command does not support raw output",
            None,
            None,
        )),
    }
}

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::into_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (deckhand::Result<serde_json::Value>, i32) {
    crate::tty::status("deckhand is working...");

    match command {
        crate::Commands::Render(args) => dispatch!(args, global, render),
        crate::Commands::Pipeline(args) => dispatch!(args, global, pipeline),
        crate::Commands::Cleanup(args) => dispatch!(args, global, cleanup),
        crate::Commands::Config(args) => dispatch!(args, global, config),

        // Special case: List uses raw output mode
        crate::Commands::List => {
            let err = deckhand::Error::validation_invalid_argument(
                "output_mode",
                "List command uses raw output mode",
                None,
                None,
            );
            crate::output::into_json::<serde_json::Value>(Err(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_val_splits_on_first_equals() {
        assert_eq!(
            parse_key_val("image_tag=gcr.io/p/app:v1=x").unwrap(),
            ("image_tag".to_string(), "gcr.io/p/app:v1=x".to_string())
        );
        assert!(parse_key_val("image_tag").is_err());
    }

    #[test]
    fn explicit_path_beats_configured() {
        let explicit = path_or_configured(Some(PathBuf::from("a.yaml")), Some("b.yaml"));
        assert_eq!(explicit, Some(PathBuf::from("a.yaml")));
        assert_eq!(path_or_configured(None, None), None);
    }
}
