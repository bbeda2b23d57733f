//! Pipeline orchestrator for the provisioning stages.
//!
//! Stages run sequentially in the fixed order of [`Stage::ALL`]. A stage
//! whose predicate is false is skipped. The first failing stage aborts the
//! run; already-applied stages are not rolled back.

use tracing::{debug, info};

use crate::cleanup::CleanupGuard;
use crate::error::ProvisionError;
use crate::stage::{Stage, StageContext};

/// Pipeline orchestrator for executing stages against one guest.
pub struct Pipeline<'a> {
    ctx: StageContext<'a>,
}

impl<'a> Pipeline<'a> {
    pub fn new(ctx: StageContext<'a>) -> Self {
        Self { ctx }
    }

    /// Returns the stages that will run, in order.
    pub fn planned_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| stage.should_run(self.ctx.client))
            .collect()
    }

    /// Executes every planned stage.
    ///
    /// `cleanup` is run by the cleanup stage and again, as a no-op, before
    /// the terminal run. The caller keeps it alive so it also fires when a
    /// stage fails.
    pub fn run(&self, cleanup: &CleanupGuard<'_>) -> Result<(), ProvisionError> {
        let stages = self.planned_stages();
        info!("starting pipeline with {} stage(s)", stages.len());

        for skipped in Stage::ALL.iter().filter(|s| !stages.contains(s)) {
            debug!(stage = %skipped, "stage disabled by configuration");
        }

        for (index, stage) in stages.iter().enumerate() {
            self.ctx.cancel.check()?;
            info!(stage = %stage, "running stage {}/{}: {}", index + 1, stages.len(), stage);
            self.ctx.sink.emit(stage.banner());

            stage
                .execute(&self.ctx, cleanup)
                .map_err(|e| ProvisionError::from_stage(&stage.to_string(), e))?;
        }

        info!("pipeline completed successfully");
        Ok(())
    }
}
