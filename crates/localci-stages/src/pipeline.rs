//! Stage pipeline orchestration.

use crate::runner::{StageResult, StageRunner};
use crate::stage::{Stage, StageCommands, StageRunConfig};
use std::time::Instant;
use tracing::{error, info, warn};

/// Result of a complete pipeline execution.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Whether setup, run and teardown all passed.
    pub success: bool,

    /// Results of individual stages, in execution order.
    pub stages: Vec<StageResult>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineReport {
    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// Number of stages that failed.
    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.passed()).count()
    }

    /// Stages in the order they ran.
    pub fn executed(&self) -> Vec<Stage> {
        self.stages.iter().map(|s| s.stage).collect()
    }

    /// Result for `stage`, if it ran.
    pub fn result(&self, stage: Stage) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// Sequences the stages of one revision test.
pub struct StagePipeline;

impl StagePipeline {
    /// Run setup, run and teardown unconditionally, then exactly one of
    /// onSuccess (all three passed) or onFailure.
    ///
    /// A stage that cannot even start (log file, spawn error) counts as failed.
    /// The outcome of the hook stage is recorded but does not change `success`.
    pub async fn run(commands: &StageCommands, config: &StageRunConfig) -> PipelineReport {
        let start = Instant::now();
        let mut stages = Vec::with_capacity(4);
        let mut all_passed = true;

        for stage in Stage::MAIN {
            let result = Self::run_stage(stage, commands, config).await;
            if !result.passed() {
                all_passed = false;
            }
            stages.push(result);
        }

        let hook = Stage::hook_for(all_passed);
        let hook_result = Self::run_stage(hook, commands, config).await;
        if !hook_result.passed() {
            warn!(stage = %hook, "Hook stage failed");
        }
        stages.push(hook_result);

        let duration_ms = start.elapsed().as_millis() as u64;
        if all_passed {
            info!(duration_ms, "Pipeline passed");
        } else {
            info!(duration_ms, "Pipeline failed");
        }

        PipelineReport {
            success: all_passed,
            stages,
            duration_ms,
        }
    }

    async fn run_stage(
        stage: Stage,
        commands: &StageCommands,
        config: &StageRunConfig,
    ) -> StageResult {
        info!(stage = %stage, "Executing stage");
        match StageRunner::run(stage, commands.commands(stage), config).await {
            Ok(result) => {
                if let Some(command) = &result.failed_command {
                    warn!(stage = %stage, command = %command, "Stage failed");
                }
                result
            }
            Err(e) => {
                error!(stage = %stage, error = %e, "Stage could not run");
                StageResult::errored(stage, &e)
            }
        }
    }
}
