use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between the fields of a correlation key.
///
/// Configuration validation rejects matrix values containing it, which keeps
/// keys injective.
pub const KEY_DELIMITER: char = '|';

/// One workflow of the testing matrix and the browsers it runs against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatrixEntry {
    pub workflow_id: String,
    pub browsers: Vec<String>,
}

/// A single (workflow, browser, test plan) triple to be tested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TestCombination {
    pub workflow_id: String,
    pub browser: String,
    pub test_plan_id: String,
}

impl TestCombination {
    /// Directory of the test plan inside the remote repository.
    pub fn work_dir(&self) -> &str {
        &self.test_plan_id
    }
}

impl fmt::Display for TestCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {} / {}", self.workflow_id, self.browser, self.test_plan_id)
    }
}

/// Token binding one dispatched run to the callbacks it produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Derive the key for the `run_index`-th run of `combination`.
    pub fn new(combination: &TestCombination, run_index: u32) -> Self {
        let d = KEY_DELIMITER;
        Self(format!(
            "{run_index}{d}{}{d}{}{d}{}",
            combination.workflow_id, combination.browser, combination.test_plan_id
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Expand the matrix into every (workflow, browser, test plan) triple.
///
/// Browsers are expanded per workflow and test plans per browser, in input order.
pub fn enumerate(matrix: &[MatrixEntry], test_plans: &[String]) -> Vec<TestCombination> {
    matrix
        .iter()
        .flat_map(|entry| {
            entry.browsers.iter().flat_map(move |browser| {
                test_plans.iter().map(move |plan| TestCombination {
                    workflow_id: entry.workflow_id.clone(),
                    browser: browser.clone(),
                    test_plan_id: plan.clone(),
                })
            })
        })
        .collect()
}
