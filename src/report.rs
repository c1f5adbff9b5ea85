use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::consensus::{Consensus, ConsensusEngine};
use crate::error::Result;
use crate::matrix::{CorrelationKey, TestCombination};
use crate::results::{RunOutcome, RunResult};

/// Final state of one run, as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    NotDispatched,
    Lost,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_index: u32,
    pub key: CorrelationKey,
    pub status: RunStatus,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CombinationReport {
    pub combination: TestCombination,
    pub runs: Vec<RunRecord>,
    pub consensus: Consensus,
}

impl CombinationReport {
    /// Build the report from every run of a combination.
    ///
    /// Runs are ordered by index first so that consensus ties resolve the
    /// same way whatever order the runs finished in.
    pub fn new(
        combination: TestCombination,
        mut outcomes: Vec<(u32, RunOutcome)>,
        engine: &ConsensusEngine,
    ) -> Self {
        outcomes.sort_by_key(|(run_index, _)| *run_index);

        let mut runs = Vec::with_capacity(outcomes.len());
        let mut results: Vec<RunResult> = Vec::new();

        for (run_index, outcome) in outcomes {
            let key = CorrelationKey::new(&combination, run_index);
            let (status, rows) = match outcome {
                RunOutcome::Completed(rows) => {
                    let count = rows.len();
                    results.push(rows);
                    (RunStatus::Completed, count)
                }
                RunOutcome::NotDispatched => (RunStatus::NotDispatched, 0),
                RunOutcome::Lost => (RunStatus::Lost, 0),
            };
            runs.push(RunRecord {
                run_index,
                key,
                status,
                rows,
            });
        }

        let consensus = engine.evaluate(&results);

        Self {
            combination,
            runs,
            consensus,
        }
    }

    pub fn count(&self, status: RunStatus) -> usize {
        self.runs.iter().filter(|r| r.status == status).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub test_plan: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub combinations: Vec<CombinationReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub num_runs: u32,
    /// Set when teardown was requested before every plan finished.
    pub interrupted: bool,
    pub plans: Vec<PlanReport>,
}

impl RunReport {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
