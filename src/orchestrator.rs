use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;

use crate::callback::{ListenerRegistry, RunListener};
use crate::consensus::ConsensusEngine;
use crate::dispatch::Dispatcher;
use crate::matrix::{CorrelationKey, TestCombination};
use crate::report::{CombinationReport, PlanReport, RunReport, RunStatus};
use crate::results::RunOutcome;

/// Drives test plans one after another, fanning out within each plan.
pub struct Orchestrator {
    registry: Arc<ListenerRegistry>,
    dispatcher: Dispatcher,
    engine: ConsensusEngine,
    num_runs: u32,
    run_timeout: Option<Duration>,
    stopping: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ListenerRegistry>,
        dispatcher: Dispatcher,
        engine: ConsensusEngine,
        num_runs: u32,
        run_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            engine,
            num_runs,
            run_timeout,
            stopping: AtomicBool::new(false),
        }
    }

    /// Stop starting new plans and runs. Runs already waiting are left to the registry.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Run every plan in order. A plan starts only after the previous plan's
    /// combinations have all been joined and evaluated.
    pub async fn run(&self, combinations: &[TestCombination]) -> RunReport {
        let mut plans = Vec::new();

        for (test_plan, combos) in group_by_plan(combinations) {
            if self.is_stopping() {
                tracing::warn!(
                    test_plan = %test_plan,
                    "Shutdown requested, skipping remaining plans"
                );
                break;
            }
            plans.push(self.run_plan(test_plan, &combos).await);
        }

        RunReport {
            num_runs: self.num_runs,
            interrupted: self.is_stopping(),
            plans,
        }
    }

    /// Run all combinations of one plan concurrently.
    pub async fn run_plan(
        &self,
        test_plan: String,
        combinations: &[TestCombination],
    ) -> PlanReport {
        tracing::info!(
            test_plan = %test_plan,
            combinations = combinations.len(),
            runs = self.num_runs,
            "Starting test plan"
        );
        let started_at = Utc::now();

        let reports = join_all(combinations.iter().map(|c| self.run_combination(c))).await;

        for report in &reports {
            log_combination(report);
        }
        let disagreeing = reports
            .iter()
            .filter(|r| r.consensus.stats.disagreeing_rows > 0)
            .count();
        tracing::info!(
            test_plan = %test_plan,
            combinations = reports.len(),
            with_disagreement = disagreeing,
            "Finished test plan"
        );

        PlanReport {
            test_plan,
            started_at,
            finished_at: Utc::now(),
            combinations: reports,
        }
    }

    /// Dispatch every run of a combination back to back, then wait for all of
    /// them together.
    pub async fn run_combination(&self, combination: &TestCombination) -> CombinationReport {
        let mut outcomes = Vec::new();
        let mut waiting = Vec::new();

        for run_index in 0..self.num_runs {
            if self.is_stopping() {
                outcomes.push((run_index, RunOutcome::NotDispatched));
                continue;
            }

            let key = CorrelationKey::new(combination, run_index);
            // Registered first: the job may call back before the trigger call returns.
            let listener = match self.registry.register(key.clone()).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(
                        combination = %combination,
                        run = run_index,
                        error = %e,
                        "Cannot listen for run"
                    );
                    outcomes.push((run_index, RunOutcome::NotDispatched));
                    continue;
                }
            };

            if self.dispatcher.dispatch(combination, run_index, &key).await {
                waiting.push(self.wait_for_run(combination, run_index, listener));
            } else {
                self.registry.cancel(&key).await;
                outcomes.push((run_index, RunOutcome::NotDispatched));
            }
        }

        outcomes.extend(join_all(waiting).await);

        CombinationReport::new(combination.clone(), outcomes, &self.engine)
    }

    async fn wait_for_run(
        &self,
        combination: &TestCombination,
        run_index: u32,
        listener: RunListener,
    ) -> (u32, RunOutcome) {
        let key = listener.key().clone();

        let result = match self.run_timeout {
            None => listener.wait().await,
            Some(limit) => match tokio::time::timeout(limit, listener.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    self.registry.cancel(&key).await;
                    tracing::warn!(
                        combination = %combination,
                        run = run_index,
                        timeout_secs = limit.as_secs(),
                        "Run timed out waiting for callbacks"
                    );
                    None
                }
            },
        };

        match result {
            Some(rows) => (run_index, RunOutcome::Completed(rows)),
            None => {
                tracing::warn!(combination = %combination, run = run_index, key = %key, "Run lost");
                (run_index, RunOutcome::Lost)
            }
        }
    }
}

fn log_combination(report: &CombinationReport) {
    let stats = &report.consensus.stats;
    let combination = &report.combination;

    if stats.undefined {
        tracing::warn!(
            workflow = %combination.workflow_id,
            browser = %combination.browser,
            test_plan = %combination.test_plan_id,
            completed = report.count(RunStatus::Completed),
            not_dispatched = report.count(RunStatus::NotDispatched),
            lost = report.count(RunStatus::Lost),
            "No results for combination, consensus undefined (100% incomplete)"
        );
        return;
    }

    tracing::info!(
        workflow = %combination.workflow_id,
        browser = %combination.browser,
        test_plan = %combination.test_plan_id,
        completed = report.count(RunStatus::Completed),
        not_dispatched = report.count(RunStatus::NotDispatched),
        lost = report.count(RunStatus::Lost),
        rows = stats.total_rows,
        percent_incomplete = %format!("{:.2}", stats.percent_incomplete),
        percent_disagreeing = %format!("{:.2}", stats.percent_disagreeing),
        "Combination consensus"
    );
}

/// Split combinations by test plan, keeping first-appearance order.
fn group_by_plan(combinations: &[TestCombination]) -> Vec<(String, Vec<TestCombination>)> {
    let mut plans: Vec<(String, Vec<TestCombination>)> = Vec::new();
    for combination in combinations {
        match plans
            .iter_mut()
            .find(|(plan, _)| *plan == combination.test_plan_id)
        {
            Some((_, combos)) => combos.push(combination.clone()),
            None => plans.push((combination.test_plan_id.clone(), vec![combination.clone()])),
        }
    }
    plans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::events::CallbackEvent;
    use crate::config::AppConfig;
    use crate::error::{AppError, Result};
    use crate::matrix::{enumerate, MatrixEntry};
    use crate::platform::types::WorkflowDispatch;
    use crate::platform::WorkflowTrigger;
    use crate::results::ResultRow;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// Stands in for the CI system: accepted dispatches call back into the
    /// registry the way a remote job would.
    struct FakeCi {
        registry: Arc<ListenerRegistry>,
        /// Responses per run index; runs missing here never call back.
        responses: HashMap<u32, Vec<&'static str>>,
        failing_runs: Vec<u32>,
        log: Mutex<Vec<(String, String)>>,
    }

    impl FakeCi {
        fn new(registry: Arc<ListenerRegistry>) -> Self {
            Self {
                registry,
                responses: HashMap::new(),
                failing_runs: Vec::new(),
                log: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl WorkflowTrigger for FakeCi {
        async fn trigger(&self, dispatch: &WorkflowDispatch) -> Result<()> {
            let (_, key) = dispatch
                .inputs
                .callback_header
                .split_once(':')
                .ok_or_else(|| AppError::Internal("bad header".to_string()))?;
            let run_index: u32 = key.split('|').next().unwrap().parse().unwrap();

            self.log
                .lock()
                .await
                .push((dispatch.inputs.work_dir.clone(), key.to_string()));

            if self.failing_runs.contains(&run_index) {
                return Err(AppError::Dispatch("boom".to_string()));
            }

            if let Some(responses) = self.responses.get(&run_index) {
                let registry = Arc::clone(&self.registry);
                let key = CorrelationKey::from(key);
                let rows: Vec<ResultRow> = responses
                    .iter()
                    .enumerate()
                    .map(|(i, r)| ResultRow::new(i as i64 + 1, vec![r.to_string()]))
                    .collect();
                tokio::spawn(async move {
                    for row in rows {
                        registry.on_event(&key, CallbackEvent::Batch(row)).await;
                    }
                    registry.on_event(&key, CallbackEvent::Finished).await;
                });
            }
            Ok(())
        }
    }

    fn orchestrator(
        ci: FakeCi,
        num_runs: u32,
        timeout: Option<Duration>,
    ) -> (Orchestrator, Arc<FakeCi>) {
        let registry = Arc::clone(&ci.registry);
        let ci = Arc::new(ci);
        let dispatcher = Dispatcher::new(ci.clone(), &AppConfig::sample());
        (
            Orchestrator::new(
                registry,
                dispatcher,
                ConsensusEngine::new(true),
                num_runs,
                timeout,
            ),
            ci,
        )
    }

    fn combination() -> TestCombination {
        TestCombination {
            workflow_id: "nvda-test.yml".to_string(),
            browser: "chrome".to_string(),
            test_plan_id: "alert".to_string(),
        }
    }

    #[tokio::test]
    async fn test_majority_over_three_runs() {
        let registry = Arc::new(ListenerRegistry::new());
        let mut ci = FakeCi::new(Arc::clone(&registry));
        ci.responses.insert(0, vec!["A"]);
        ci.responses.insert(1, vec!["A"]);
        ci.responses.insert(2, vec!["B"]);
        let (orchestrator, _) = orchestrator(ci, 3, None);

        let report = orchestrator.run_combination(&combination()).await;

        assert_eq!(report.count(RunStatus::Completed), 3);
        assert_eq!(report.consensus.rows[0].majority, vec!["A".to_string()]);
        assert!((report.consensus.stats.percent_disagreeing - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(registry.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_dispatch_is_not_awaited() {
        let registry = Arc::new(ListenerRegistry::new());
        let mut ci = FakeCi::new(Arc::clone(&registry));
        ci.responses.insert(0, vec!["A", "B"]);
        ci.failing_runs.push(1);
        let (orchestrator, _) = orchestrator(ci, 2, None);

        let report = orchestrator.run_combination(&combination()).await;

        assert_eq!(report.count(RunStatus::Completed), 1);
        assert_eq!(report.count(RunStatus::NotDispatched), 1);
        assert_eq!(report.consensus.stats.runs, 1);
        assert_eq!(report.consensus.stats.total_rows, 2);
        assert_eq!(registry.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_all_dispatches_fail() {
        let registry = Arc::new(ListenerRegistry::new());
        let mut ci = FakeCi::new(Arc::clone(&registry));
        ci.failing_runs = vec![0, 1];
        let (orchestrator, _) = orchestrator(ci, 2, None);

        let report = orchestrator.run_combination(&combination()).await;

        assert_eq!(report.count(RunStatus::NotDispatched), 2);
        assert!(report.consensus.stats.undefined);
        assert_eq!(report.consensus.stats.percent_incomplete, 100.0);
    }

    #[tokio::test]
    async fn test_silent_run_is_lost_after_timeout() {
        let registry = Arc::new(ListenerRegistry::new());
        let mut ci = FakeCi::new(Arc::clone(&registry));
        ci.responses.insert(0, vec!["A"]);
        let (orchestrator, _) = orchestrator(ci, 2, Some(Duration::from_millis(50)));

        let report = orchestrator.run_combination(&combination()).await;

        assert_eq!(report.count(RunStatus::Completed), 1);
        assert_eq!(report.count(RunStatus::Lost), 1);
        assert_eq!(registry.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_plans_run_in_order() {
        let registry = Arc::new(ListenerRegistry::new());
        let mut ci = FakeCi::new(Arc::clone(&registry));
        ci.responses.insert(0, vec!["A"]);
        let (orchestrator, ci) = orchestrator(ci, 1, None);

        let matrix = vec![MatrixEntry {
            workflow_id: "nvda-test.yml".to_string(),
            browsers: vec!["chrome".to_string(), "firefox".to_string()],
        }];
        let plans = vec!["alert".to_string(), "banner".to_string()];
        let report = orchestrator.run(&enumerate(&matrix, &plans)).await;

        let names: Vec<_> = report.plans.iter().map(|p| p.test_plan.as_str()).collect();
        assert_eq!(names, vec!["alert", "banner"]);
        assert!(report.plans.iter().all(|p| p.combinations.len() == 2));
        assert!(!report.interrupted);

        // Every "alert" dispatch precedes every "banner" dispatch.
        let dirs: Vec<_> = ci.log.lock().await.iter().map(|(dir, _)| dir.clone()).collect();
        assert_eq!(dirs, vec!["alert", "alert", "banner", "banner"]);
    }

    #[tokio::test]
    async fn test_stop_skips_remaining_work() {
        let registry = Arc::new(ListenerRegistry::new());
        let ci = FakeCi::new(Arc::clone(&registry));
        let (orchestrator, ci) = orchestrator(ci, 2, None);
        orchestrator.stop();

        let report = orchestrator.run(&[combination()]).await;

        assert!(report.interrupted);
        assert!(report.plans.is_empty());
        assert!(ci.log.lock().await.is_empty());
    }

    #[test]
    fn test_group_by_plan_keeps_first_appearance_order() {
        let matrix = vec![
            MatrixEntry {
                workflow_id: "a.yml".to_string(),
                browsers: vec!["chrome".to_string()],
            },
            MatrixEntry {
                workflow_id: "b.yml".to_string(),
                browsers: vec!["safari".to_string()],
            },
        ];
        let plans = vec!["zeta".to_string(), "alpha".to_string()];
        let grouped = group_by_plan(&enumerate(&matrix, &plans));

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, "zeta");
        assert_eq!(grouped[1].0, "alpha");
        assert_eq!(grouped[0].1.len(), 2);
    }
}
