use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{Error, Result};
use crate::stage_executor::{StageExecutor, StageOutcome};
use crate::utils::validation;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineStage {
    pub name: String,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_credentials: bool,
}

impl PipelineStage {
    pub fn new(name: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            name: name.into(),
            commands,
            timeout_minutes: None,
            timeout_seconds: None,
            needs: Vec::new(),
            env: BTreeMap::new(),
            requires_credentials: false,
        }
    }

    fn needs(mut self, needs: &[&str]) -> Self {
        self.needs = needs.iter().map(|n| n.to_string()).collect();
        self
    }

    fn timeout_minutes(mut self, minutes: u64) -> Self {
        self.timeout_minutes = Some(minutes);
        self
    }

    fn with_credentials(mut self) -> Self {
        self.requires_credentials = true;
        self
    }

    /// Wall-clock limit for the whole stage. `None` means unlimited.
    pub fn timeout(&self) -> Result<Option<Duration>> {
        match (self.timeout_minutes, self.timeout_seconds) {
            (Some(_), Some(_)) => Err(Error::validation_invalid_argument(
                "timeout",
                format!(
                    "Stage '{}' sets both timeout_minutes and timeout_seconds",
                    self.name
                ),
                Some(self.name.clone()),
                None,
            )),
            (Some(0), _) | (_, Some(0)) => Err(Error::validation_invalid_argument(
                "timeout",
                format!("Stage '{}' has a zero timeout", self.name),
                Some(self.name.clone()),
                None,
            )),
            (Some(minutes), None) => minutes
                .checked_mul(60)
                .map(|seconds| Some(Duration::from_secs(seconds)))
                .ok_or_else(|| {
                    Error::validation_invalid_argument(
                        "timeout_minutes",
                        format!("Stage '{}' has a timeout too large to represent", self.name),
                        Some(minutes.to_string()),
                        None,
                    )
                }),
            (None, Some(seconds)) => Ok(Some(Duration::from_secs(seconds))),
            (None, None) => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineDefinition {
    pub stages: Vec<PipelineStage>,
}

impl PipelineDefinition {
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        for stage in &self.stages {
            validation::require_non_empty(&stage.name, "stages.name", "Stage name cannot be empty")?;
            if stage.commands.is_empty() {
                return Err(Error::validation_invalid_argument(
                    "stages.commands",
                    format!("Stage '{}' has no commands", stage.name),
                    Some(stage.name.clone()),
                    None,
                ));
            }
            stage.timeout()?;
        }
        order_stages(&self.stages).map(|_| ())
    }
}

const NOX: &str = "python -m nox";
const ACTIVATE_SERVICE_ACCOUNT: &str =
    "gcloud auth activate-service-account --key-file=\"$GOOGLE_APPLICATION_CREDENTIALS\"";

/// The repository's CI pipeline: install tooling, lint, unit tests, then the
/// suites that talk to real cloud resources.
pub fn default_pipeline() -> PipelineDefinition {
    let nox = |session: &str| format!("{} -s {}", NOX, session);

    PipelineDefinition {
        stages: vec![
            PipelineStage::new(
                "install-deps",
                vec![
                    "gcloud components install kubectl beta --quiet".to_string(),
                    "python -m pip install --upgrade nox".to_string(),
                ],
            ),
            PipelineStage::new("lint", vec![nox("lint")]).needs(&["install-deps"]),
            PipelineStage::new("unit-test", vec![nox("unit_test")]).needs(&["install-deps"]),
            PipelineStage::new(
                "integration-test",
                vec![ACTIVATE_SERVICE_ACCOUNT.to_string(), nox("integration_test")],
            )
            .needs(&["install-deps"])
            .timeout_minutes(30)
            .with_credentials(),
            PipelineStage::new(
                "e2e-test-gke",
                vec![ACTIVATE_SERVICE_ACCOUNT.to_string(), nox("e2e_test_gke")],
            )
            .needs(&["install-deps"])
            .timeout_minutes(30)
            .with_credentials(),
            PipelineStage::new(
                "e2e-test-gae",
                vec![ACTIVATE_SERVICE_ACCOUNT.to_string(), nox("e2e_test_gae")],
            )
            .needs(&["install-deps"])
            .timeout_minutes(30)
            .with_credentials(),
        ],
    }
}

/// Load a pipeline definition file, or the built-in pipeline when `path` is `None`.
pub fn load(path: Option<&Path>) -> Result<PipelineDefinition> {
    let Some(path) = path else {
        return Ok(default_pipeline());
    };

    let value = config::load_structured(path)?;
    let definition: PipelineDefinition =
        config::from_value(value, &format!("pipeline {}", path.display()))?;
    definition.validate()?;
    Ok(definition)
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelinePlan {
    pub stages: Vec<PipelineStage>,
    /// False when stages were picked by name; dependencies are then ignored.
    pub dependencies_enforced: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PipelinePlan {
    pub fn requires_credentials(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|s| s.requires_credentials)
            .map(|s| s.name.clone())
            .collect()
    }
}

/// Order the stages to run.
///
/// With an empty `selection` every stage runs in dependency order. Otherwise
/// only the named stages run, in definition order, with `needs` ignored.
pub fn plan(definition: &PipelineDefinition, selection: &[String]) -> Result<PipelinePlan> {
    definition.validate()?;

    if selection.is_empty() {
        let (stages, warnings) = order_stages(&definition.stages)?;
        return Ok(PipelinePlan {
            stages,
            dependencies_enforced: true,
            warnings,
        });
    }

    let available = definition.stage_names();
    for name in selection {
        if !available.contains(name) {
            return Err(Error::stage_not_found(name, available));
        }
    }

    let stages: Vec<PipelineStage> = definition
        .stages
        .iter()
        .filter(|stage| selection.contains(&stage.name))
        .cloned()
        .collect();

    let mut warnings = Vec::new();
    if stages.iter().any(|stage| !stage.needs.is_empty()) {
        warnings.push("Stage dependencies ignored for explicitly selected stages".to_string());
    }

    Ok(PipelinePlan {
        stages,
        dependencies_enforced: false,
        warnings,
    })
}

fn order_stages(stages: &[PipelineStage]) -> Result<(Vec<PipelineStage>, Vec<String>)> {
    let mut name_index = HashMap::new();
    for (idx, stage) in stages.iter().enumerate() {
        if name_index.insert(stage.name.as_str(), idx).is_some() {
            return Err(Error::validation_invalid_argument(
                "stages",
                format!("Duplicate stage name '{}'", stage.name),
                Some(stage.name.clone()),
                None,
            ));
        }
    }

    let mut indegree = vec![0usize; stages.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];

    for (idx, stage) in stages.iter().enumerate() {
        for need in &stage.needs {
            let Some(&parent_idx) = name_index.get(need.as_str()) else {
                return Err(Error::validation_invalid_argument(
                    "stages",
                    format!("Stage '{}' depends on unknown stage '{}'", stage.name, need),
                    Some(stage.name.clone()),
                    None,
                ));
            };
            indegree[idx] += 1;
            dependents[parent_idx].push(idx);
        }
    }

    // Lowest index first keeps peers in definition order.
    let mut ready: BTreeSet<usize> = (0..stages.len()).filter(|i| indegree[*i] == 0).collect();
    let mut ordered = Vec::with_capacity(stages.len());

    while let Some(idx) = ready.pop_first() {
        ordered.push(stages[idx].clone());
        for &child in &dependents[idx] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    if ordered.len() != stages.len() {
        let pending: Vec<String> = stages
            .iter()
            .enumerate()
            .filter(|(idx, _)| indegree[*idx] > 0)
            .map(|(_, stage)| stage.name.clone())
            .collect();
        return Err(Error::validation_invalid_argument(
            "stages",
            "Stages contain a dependency cycle",
            None,
            Some(pending),
        ));
    }

    let mut warnings = Vec::new();
    if ordered.iter().zip(stages).any(|(a, b)| a.name != b.name) {
        warnings.push("Stages reordered based on dependencies".to_string());
    }

    Ok((ordered, warnings))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineRunStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub name: String,
    pub status: PipelineRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub commands_run: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_command: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StageResult {
    fn skipped(name: &str, reason: String) -> Self {
        Self {
            name: name.to_string(),
            status: PipelineRunStatus::Skipped,
            exit_code: None,
            duration_ms: 0,
            commands_run: 0,
            failed_command: None,
            timed_out: false,
            error: None,
            warnings: vec![reason],
        }
    }

    fn from_outcome(name: &str, outcome: StageOutcome, elapsed: Duration) -> Self {
        let status = if outcome.success {
            PipelineRunStatus::Success
        } else {
            PipelineRunStatus::Failed
        };
        let exit_code = if outcome.success || outcome.exit_code != 0 {
            outcome.exit_code
        } else {
            1
        };

        Self {
            name: name.to_string(),
            status,
            exit_code: Some(exit_code),
            duration_ms: elapsed.as_millis() as u64,
            commands_run: outcome.commands_run,
            failed_command: outcome.failed_command,
            timed_out: outcome.timed_out,
            error: outcome.error,
            warnings: Vec::new(),
        }
    }

    fn errored(name: &str, err: Error, elapsed: Duration) -> Self {
        let error = match err.details.get("problem").and_then(|p| p.as_str()) {
            Some(problem) => format!("{}: {}", err.message, problem),
            None => err.message,
        };
        Self {
            name: name.to_string(),
            status: PipelineRunStatus::Failed,
            exit_code: Some(1),
            duration_ms: elapsed.as_millis() as u64,
            commands_run: 0,
            failed_command: None,
            timed_out: false,
            error: Some(error),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunSummary {
    pub total_stages: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageResult>,
    pub status: PipelineRunStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub summary: PipelineRunSummary,
}

impl PipelineRunResult {
    /// Process exit code: the first failed stage's code, else 0.
    pub fn exit_code(&self) -> i32 {
        self.stages
            .iter()
            .find(|s| s.status == PipelineRunStatus::Failed)
            .map(|s| s.exit_code.unwrap_or(1))
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skip every remaining stage after the first failure.
    pub fail_fast: bool,
    /// Extra environment for every stage, applied before the stage's own env.
    pub env: Vec<(String, String)>,
}

/// Run planned stages one at a time.
pub fn run(
    plan: &PipelinePlan,
    executor: &dyn StageExecutor,
    options: &RunOptions,
) -> PipelineRunResult {
    let started_at = Utc::now();
    let mut results: Vec<StageResult> = Vec::with_capacity(plan.stages.len());
    let mut status_map: HashMap<String, PipelineRunStatus> = HashMap::new();
    let mut halted_by: Option<String> = None;

    for stage in &plan.stages {
        let result = if let Some(failed) = &halted_by {
            StageResult::skipped(
                &stage.name,
                format!("Skipped after '{}' failed (fail-fast)", failed),
            )
        } else if let Some(dep) = failed_dependency(stage, &status_map, plan.dependencies_enforced)
        {
            StageResult::skipped(
                &stage.name,
                format!("Skipped because '{}' did not succeed", dep),
            )
        } else {
            log_status!("pipeline", "Running stage '{}'", stage.name);
            let started = Instant::now();
            let result = match executor.execute_stage(stage, &options.env) {
                Ok(outcome) => StageResult::from_outcome(&stage.name, outcome, started.elapsed()),
                Err(err) => StageResult::errored(&stage.name, err, started.elapsed()),
            };
            log_status!(
                "pipeline",
                "Stage '{}' {} in {}ms",
                stage.name,
                if result.status == PipelineRunStatus::Success {
                    "succeeded"
                } else {
                    "failed"
                },
                result.duration_ms
            );
            result
        };

        if result.status == PipelineRunStatus::Failed && options.fail_fast {
            halted_by = Some(stage.name.clone());
        }
        status_map.insert(stage.name.clone(), result.status);
        results.push(result);
    }

    let status = derive_overall_status(&results);
    let summary = build_summary(&results, status);

    PipelineRunResult {
        run_id: uuid::Uuid::new_v4().to_string(),
        started_at,
        stages: results,
        status,
        warnings: plan.warnings.clone(),
        summary,
    }
}

fn failed_dependency(
    stage: &PipelineStage,
    status_map: &HashMap<String, PipelineRunStatus>,
    enforced: bool,
) -> Option<String> {
    if !enforced {
        return None;
    }
    stage
        .needs
        .iter()
        .find(|need| status_map.get(need.as_str()) != Some(&PipelineRunStatus::Success))
        .cloned()
}

fn derive_overall_status(results: &[StageResult]) -> PipelineRunStatus {
    if results.iter().any(|r| r.status == PipelineRunStatus::Failed) {
        return PipelineRunStatus::Failed;
    }
    if !results.is_empty() && results.iter().all(|r| r.status == PipelineRunStatus::Skipped) {
        return PipelineRunStatus::Skipped;
    }
    PipelineRunStatus::Success
}

fn build_summary(results: &[StageResult], status: PipelineRunStatus) -> PipelineRunSummary {
    let count = |wanted: PipelineRunStatus| results.iter().filter(|r| r.status == wanted).count();

    let next_actions = match status {
        PipelineRunStatus::Failed => results
            .iter()
            .filter(|r| r.status == PipelineRunStatus::Failed)
            .map(|r| format!("Fix stage '{}' and re-run with --stage {}", r.name, r.name))
            .collect(),
        _ => Vec::new(),
    };

    PipelineRunSummary {
        total_stages: results.len(),
        succeeded: count(PipelineRunStatus::Success),
        failed: count(PipelineRunStatus::Failed),
        skipped: count(PipelineRunStatus::Skipped),
        next_actions,
    }
}
