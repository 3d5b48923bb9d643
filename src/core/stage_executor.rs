// Stage execution - runs each stage command through the configured shell.

use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::defaults::PipelineConfig;
use crate::error::{Error, Result, StageExecutionFailedDetails};
use crate::pipeline::PipelineStage;
use crate::utils::shell;

/// Exit code reported when a stage exceeds its timeout (matches coreutils `timeout`).
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit code reported when a command could not be started.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    pub success: bool,
    pub exit_code: i32,
    pub commands_run: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_command: Option<String>,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageOutcome {
    pub fn succeeded(commands_run: usize) -> Self {
        Self {
            success: true,
            exit_code: 0,
            commands_run,
            failed_command: None,
            timed_out: false,
            error: None,
        }
    }

    pub fn failed(commands_run: usize, command: &str, exit_code: i32) -> Self {
        Self {
            success: false,
            exit_code,
            commands_run,
            failed_command: Some(command.to_string()),
            timed_out: false,
            error: None,
        }
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

pub trait StageExecutor {
    /// Run every command of `stage` in order, stopping at the first failure.
    /// `env` is applied before the stage's own `env`.
    fn execute_stage(&self, stage: &PipelineStage, env: &[(String, String)]) -> Result<StageOutcome>;
}

/// Runs stage commands as child processes of the configured shell.
///
/// Child stdout is redirected to our stderr so that stdout carries only the
/// JSON result.
pub struct ShellStageExecutor {
    shell: Vec<String>,
    poll_interval: Duration,
}

enum Exit {
    Finished(ExitStatus),
    TimedOut,
}

impl ShellStageExecutor {
    pub fn new(shell: Vec<String>) -> Result<Self> {
        if shell.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(Error::config_invalid_value(
                "defaults.pipeline.shell",
                None,
                "Shell must name a program, e.g. [\"sh\", \"-c\"]",
            ));
        }

        Ok(Self {
            shell,
            poll_interval: Duration::from_millis(100),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(config.shell.clone())?
            .poll_interval(Duration::from_millis(config.poll_interval_ms.max(1))))
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn spawn(
        &self,
        command: &str,
        stage: &PipelineStage,
        env: &[(String, String)],
    ) -> io::Result<Child> {
        Command::new(&self.shell[0])
            .args(&self.shell[1..])
            .arg(command)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .envs(stage.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::from(io::stderr()))
            .stderr(Stdio::inherit())
            .spawn()
    }

    fn wait(&self, child: &mut Child, deadline: Option<Instant>) -> io::Result<Exit> {
        let Some(deadline) = deadline else {
            return child.wait().map(Exit::Finished);
        };

        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Exit::Finished(status));
            }

            let now = Instant::now();
            if now >= deadline {
                child.kill().ok();
                child.wait().ok();
                return Ok(Exit::TimedOut);
            }

            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}

impl StageExecutor for ShellStageExecutor {
    fn execute_stage(&self, stage: &PipelineStage, env: &[(String, String)]) -> Result<StageOutcome> {
        let timeout = stage.timeout()?;
        // A limit too far out for the clock is no limit.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        for (index, command) in stage.commands.iter().enumerate() {
            let commands_run = index + 1;
            log_status!("stage", "[{}] $ {}", stage.name, command);

            let mut child = match self.spawn(command, stage, env) {
                Ok(child) => child,
                Err(e) => {
                    return Ok(
                        StageOutcome::failed(commands_run, command, SPAWN_FAILURE_EXIT_CODE)
                            .with_error(format!(
                                "Failed to start {}: {}",
                                shell::display_command(&self.shell, command),
                                e
                            )),
                    )
                }
            };

            let exit = self.wait(&mut child, deadline).map_err(|e| {
                Error::stage_execution_failed(StageExecutionFailedDetails {
                    stage: stage.name.clone(),
                    command: command.clone(),
                    error: e.to_string(),
                })
            })?;

            match exit {
                Exit::Finished(status) if status.success() => {}
                Exit::Finished(status) => {
                    let code = status.code().filter(|c| *c != 0).unwrap_or(1);
                    return Ok(StageOutcome::failed(commands_run, command, code)
                        .with_error(format!("Command exited with code {}", code)));
                }
                Exit::TimedOut => {
                    let limit = timeout.map(|t| t.as_secs()).unwrap_or_default();
                    let mut outcome =
                        StageOutcome::failed(commands_run, command, TIMEOUT_EXIT_CODE).with_error(
                            format!("Stage '{}' timed out after {}s", stage.name, limit),
                        );
                    outcome.timed_out = true;
                    return Ok(outcome);
                }
            }
        }

        Ok(StageOutcome::succeeded(stage.commands.len()))
    }
}

/// Reports every stage as successful without running anything.
pub struct DryRunExecutor;

impl StageExecutor for DryRunExecutor {
    fn execute_stage(&self, stage: &PipelineStage, _env: &[(String, String)]) -> Result<StageOutcome> {
        stage.timeout()?;
        for command in &stage.commands {
            log_status!("dry-run", "[{}] $ {}", stage.name, command);
        }
        Ok(StageOutcome::succeeded(0))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn stage(commands: &[&str]) -> PipelineStage {
        PipelineStage::new("test", commands.iter().map(|c| c.to_string()).collect())
    }

    fn executor() -> ShellStageExecutor {
        ShellStageExecutor::new(vec!["sh".to_string(), "-c".to_string()])
            .unwrap()
            .poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn all_commands_succeed() {
        let outcome = executor().execute_stage(&stage(&["true", "exit 0"]), &[]).unwrap();
        assert_eq!(outcome, StageOutcome::succeeded(2));
    }

    #[test]
    fn first_failure_stops_remaining_commands() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let outcome = executor()
            .execute_stage(
                &stage(&["exit 3", &format!("touch {}", marker.display())]),
                &[],
            )
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.commands_run, 1);
        assert_eq!(outcome.failed_command.as_deref(), Some("exit 3"));
        assert!(!marker.exists());
    }

    #[test]
    fn timeout_kills_command() {
        let mut slow = stage(&["sleep 5"]);
        slow.timeout_seconds = Some(1);

        let started = Instant::now();
        let outcome = executor().execute_stage(&slow, &[]).unwrap();

        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn unrepresentable_timeout_runs_without_deadline() {
        let mut s = stage(&["true"]);
        s.timeout_seconds = Some(u64::MAX);

        let outcome = executor().execute_stage(&s, &[]).unwrap();
        assert_eq!(outcome, StageOutcome::succeeded(1));
    }

    #[test]
    fn env_is_visible_and_stage_env_wins() {
        let mut s = stage(&["test \"$TARGET\" = stage && test \"$SHARED\" = run"]);
        s.env.insert("TARGET".to_string(), "stage".to_string());
        let env = vec![
            ("TARGET".to_string(), "run".to_string()),
            ("SHARED".to_string(), "run".to_string()),
        ];

        let outcome = executor().execute_stage(&s, &env).unwrap();
        assert!(outcome.success, "{:?}", outcome);
    }

    #[test]
    fn missing_shell_program_is_a_spawn_failure() {
        let executor = ShellStageExecutor::new(vec!["/nonexistent/shell".to_string()]).unwrap();
        let outcome = executor.execute_stage(&stage(&["true"]), &[]).unwrap();
        assert_eq!(outcome.exit_code, SPAWN_FAILURE_EXIT_CODE);
        assert!(outcome.error.unwrap().contains("Failed to start"));
    }

    #[test]
    fn empty_shell_is_rejected() {
        assert!(ShellStageExecutor::new(Vec::new()).is_err());
    }

    #[test]
    fn dry_run_never_executes() {
        let outcome = DryRunExecutor
            .execute_stage(&stage(&["exit 1"]), &[])
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.commands_run, 0);
    }
}
