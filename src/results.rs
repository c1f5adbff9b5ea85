use serde::{Deserialize, Serialize};

/// Row id used when a callback names neither a CSV row nor a presentation number.
pub const UNKNOWN_ROW: i64 = -1;

/// Responses captured for one logical test row in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub test_row_id: i64,
    /// One response per probed assertion, in order.
    pub responses: Vec<String>,
}

impl ResultRow {
    pub fn new(test_row_id: i64, responses: Vec<String>) -> Self {
        Self {
            test_row_id,
            responses,
        }
    }

    /// True if the row is missing a response for any assertion.
    pub fn is_incomplete(&self) -> bool {
        self.responses.is_empty() || self.responses.iter().any(|r| r.trim().is_empty())
    }
}

/// Rows reported by one run, in arrival order.
pub type RunResult = Vec<ResultRow>;

/// How a single dispatched run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Terminal callback received.
    Completed(RunResult),
    /// The trigger call failed, so no callback will ever arrive.
    NotDispatched,
    /// Dispatched, but no terminal callback arrived before the timeout or teardown.
    Lost,
}
