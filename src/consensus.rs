use std::collections::BTreeMap;

use serde::Serialize;

use crate::results::RunResult;

/// Most frequent response set for one test row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsensusRow {
    pub test_row_id: i64,
    pub majority: Vec<String>,
    /// Rows that reported exactly `majority`.
    pub votes: usize,
    /// Rows reported for this test row across all runs.
    pub observed: usize,
}

/// Disagreement and completeness figures for one combination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CombinationStats {
    pub runs: usize,
    pub total_rows: usize,
    pub incomplete_rows: usize,
    pub disagreeing_rows: usize,
    pub percent_incomplete: f64,
    pub percent_disagreeing: f64,
    /// No rows were reported at all, so there is no consensus to speak of.
    pub undefined: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consensus {
    pub rows: Vec<ConsensusRow>,
    pub stats: CombinationStats,
}

pub struct ConsensusEngine {
    check_incomplete: bool,
}

impl ConsensusEngine {
    /// With `check_incomplete` off every row counts as complete.
    pub fn new(check_incomplete: bool) -> Self {
        Self { check_incomplete }
    }

    /// Compute the majority per test row over the completed runs of one combination.
    ///
    /// Ties go to the response set seen first in input order.
    pub fn evaluate(&self, results: &[RunResult]) -> Consensus {
        let mut groups: BTreeMap<i64, Vec<&Vec<String>>> = BTreeMap::new();
        for row in results.iter().flatten() {
            groups.entry(row.test_row_id).or_default().push(&row.responses);
        }

        let rows: Vec<ConsensusRow> = groups
            .iter()
            .map(|(&test_row_id, observed)| {
                let (majority, votes) = majority(observed);
                ConsensusRow {
                    test_row_id,
                    majority: majority.clone(),
                    votes,
                    observed: observed.len(),
                }
            })
            .collect();

        let total_rows: usize = groups.values().map(Vec::len).sum();
        let disagreeing_rows: usize = rows.iter().map(|r| r.observed - r.votes).sum();
        let incomplete_rows = if self.check_incomplete {
            results
                .iter()
                .flatten()
                .filter(|row| row.is_incomplete())
                .count()
        } else {
            0
        };

        let stats = if total_rows == 0 {
            CombinationStats {
                runs: results.len(),
                total_rows,
                incomplete_rows,
                disagreeing_rows,
                percent_incomplete: 100.0,
                percent_disagreeing: 0.0,
                undefined: true,
            }
        } else {
            CombinationStats {
                runs: results.len(),
                total_rows,
                incomplete_rows,
                disagreeing_rows,
                percent_incomplete: percent(incomplete_rows, total_rows),
                percent_disagreeing: percent(disagreeing_rows, total_rows),
                undefined: false,
            }
        };

        Consensus { rows, stats }
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    part as f64 / whole as f64 * 100.0
}

/// Most frequent entry and its count; the earliest entry wins a tie.
fn majority<'a>(observed: &[&'a Vec<String>]) -> (&'a Vec<String>, usize) {
    let mut counts: Vec<(&'a Vec<String>, usize)> = Vec::new();
    for &responses in observed {
        match counts.iter_mut().find(|(seen, _)| *seen == responses) {
            Some((_, count)) => *count += 1,
            None => counts.push((responses, 1)),
        }
    }

    let mut best = counts[0];
    for &candidate in &counts[1..] {
        if candidate.1 > best.1 {
            best = candidate;
        }
    }
    best
}
