//! The two-phase deploy runner.
//!
//! Ported from the upstream Go implementation's runner package: a prepare
//! pass runs every task's conditions and `Preparer::prepare` calls
//! in task order, aborting the whole deploy on the first error (an assertion
//! failure or an action's own prepare error); a (non-assertion) condition
//! failure instead disables just that task and the prepare pass continues.
//! The execute pass then walks the same order again, skipping masked or
//! disabled tasks, running before-hooks, `Executor::execute`, and
//! after-hooks (regardless of whether execute failed), ORing every action's
//! `changed` flag into the task's own, and reporting `updated`/`pristine`/
//! `FAIL` per task exactly as the original's `Runner.Deploy` logs.

use crate::actions::Action;
use crate::condition::Instance;
use crate::error::SystemDeployError;
use crate::graph::{Context, Graph, TaskManager};

/// Outcome of running one task's conditions/assertions during prepare.
enum ConditionOutcome {
    Ok,
    Disabled { condition: String, value: String },
}

/// Evaluates every condition/assertion attached to a task.
///
/// A failing `Condition<Name>=` disables the task and prepare continues; a
/// failing `Assert<Name>=` aborts the whole deploy immediately.
fn evaluate_conditions(task_name: &str, conditions: &[Instance]) -> Result<ConditionOutcome, SystemDeployError> {
    for instance in conditions {
        if let Err(e) = instance.run() {
            let value = instance.values.join(", ");
            if instance.assertion {
                return Err(SystemDeployError::AssertionFailed {
                    task: task_name.to_string(),
                    condition: instance.condition.name.clone(),
                    value,
                });
            }
            tracing::debug!(task = task_name, condition = %instance.condition.name, error = %e, "condition failed");
            return Ok(ConditionOutcome::Disabled {
                condition: instance.condition.name.clone(),
                value,
            });
        }
    }
    Ok(ConditionOutcome::Ok)
}

/// The result of one task's execute pass.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub name: String,
    pub skipped: bool,
    pub changed: bool,
    pub error: Option<String>,
}

/// A full deploy run's outcome.
#[derive(Debug, Clone, Default)]
pub struct DeployReport {
    pub tasks: Vec<TaskReport>,
}

impl DeployReport {
    pub fn has_failures(&self) -> bool {
        self.tasks.iter().any(|t| t.error.is_some())
    }
}

/// Orchestrates a prepare pass followed by an execute pass over a [`Graph`]
/// of registered tasks.
pub struct Runner {
    graph: Graph,
    conditions: Vec<(String, Vec<Instance>)>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            conditions: Vec::new(),
        }
    }

    /// Registers a task and its already-built actions with the graph.
    ///
    /// `conditions` are evaluated during [`Runner::deploy`]'s prepare pass
    /// before any of `actions`' own `prepare` is invoked.
    pub fn add_task(
        &mut self,
        name: &str,
        actions: Vec<Box<dyn Action>>,
        conditions: Vec<Instance>,
    ) -> Result<(), SystemDeployError> {
        self.graph.add_task(name, actions)?;
        self.conditions.push((name.to_string(), conditions));
        Ok(())
    }

    pub fn task_names(&self) -> Vec<String> {
        self.graph.task_names()
    }

    /// Masks a registered task so it's skipped during execute, without
    /// disabling it outright (it can still be unmasked by an `[OnChange]`
    /// hook elsewhere in the deploy).
    pub fn mask_task(&self, name: &str) -> Result<(), SystemDeployError> {
        self.graph.mask_task(name)
    }

    /// Runs the prepare pass, then the execute pass, over every registered
    /// task in insertion order.
    pub fn deploy(&mut self, ctx: &Context) -> Result<DeployReport, SystemDeployError> {
        self.prepare()?;
        Ok(self.execute(ctx))
    }

    fn prepare(&mut self) -> Result<(), SystemDeployError> {
        self.graph.set_in_prepare(true);
        let result = self.prepare_inner();
        self.graph.set_in_prepare(false);
        result
    }

    fn prepare_inner(&mut self) -> Result<(), SystemDeployError> {
        let names = self.graph.task_names();
        for name in &names {
            let conditions = self
                .conditions
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, c)| c.clone())
                .unwrap_or_default();

            match evaluate_conditions(name, &conditions)? {
                ConditionOutcome::Ok => {}
                ConditionOutcome::Disabled { condition, value } => {
                    tracing::info!(task = %name, condition = %condition, value = %value, "disabling task: condition not met");
                    self.graph.disable_task(name)?;
                    continue;
                }
            }

            let mut actions = self.graph.take_actions(name);
            let mut prepare_result = Ok(());
            for action in &mut actions {
                if action.supports_prepare() {
                    if let Err(e) = action.prepare(&mut self.graph) {
                        prepare_result = Err(e);
                        break;
                    }
                }
            }
            self.graph.put_actions(name, actions);
            prepare_result?;
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &Context) -> DeployReport {
        self.graph.set_in_execute(true);
        let report = self.execute_inner(ctx);
        self.graph.set_in_execute(false);
        report
    }

    fn execute_inner(&mut self, ctx: &Context) -> DeployReport {
        let mut report = DeployReport::default();

        for name in self.graph.task_names() {
            if self.graph.is_masked(&name).unwrap_or(false) || self.graph.is_disabled(&name) {
                report.tasks.push(TaskReport {
                    name,
                    skipped: true,
                    changed: false,
                    error: None,
                });
                continue;
            }

            let had_error = self.run_one_task(&name, ctx, &mut report);
            if had_error {
                // A before-hook or action error is fatal to the whole deploy
                // (§4.9/§4.10): the failing task's after-hooks already ran,
                // but no further task starts.
                break;
            }
        }

        report
    }

    /// Runs one task's before-hooks, actions, and after-hooks, and records its
    /// outcome onto `report`. Returns whether the task failed (in which case
    /// the caller aborts the rest of the deploy).
    fn run_one_task(&mut self, name: &str, ctx: &Context, report: &mut DeployReport) -> bool {
        let run_result = (|| -> Result<bool, SystemDeployError> {
            let task_ctx = self.graph.run_before_hooks(name, ctx.clone())?;

            let mut actions = self.graph.take_actions(name);
            let mut changed = false;
            let mut exec_result = Ok(());
            for action in &mut actions {
                if action.supports_execute() {
                    match action.execute(&task_ctx) {
                        Ok(c) => changed |= c,
                        Err(e) => {
                            exec_result = Err(e);
                            break;
                        }
                    }
                }
            }
            self.graph.put_actions(name, actions);
            exec_result?;
            Ok(changed)
        })();

        let (changed, error) = match run_result {
            Ok(changed) => (changed, None),
            Err(e) => (false, Some(e)),
        };

        let failures = self.graph.run_after_hooks(name, ctx, changed, error.as_ref());
        for failure in failures {
            tracing::warn!(task = %name, error = %failure, "after-hook failed");
        }

        let failed = error.is_some();
        match error {
            Some(e) => {
                tracing::error!(task = %name, error = %e, "FAIL");
                report.tasks.push(TaskReport {
                    name: name.to_string(),
                    skipped: false,
                    changed,
                    error: Some(e.to_string()),
                });
            }
            None => {
                if changed {
                    tracing::info!(task = %name, "updated");
                } else {
                    tracing::info!(task = %name, "pristine");
                }
                report.tasks.push(TaskReport {
                    name: name.to_string(),
                    skipped: false,
                    changed,
                    error: None,
                });
            }
        }

        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Context;
    use std::sync::Arc;

    struct Toggle {
        changed: bool,
    }
    impl Action for Toggle {
        fn name(&self) -> String {
            "toggle".to_string()
        }
        fn supports_execute(&self) -> bool {
            true
        }
        fn execute(&mut self, _ctx: &Context) -> Result<bool, SystemDeployError> {
            Ok(self.changed)
        }
    }

    struct Failing;
    impl Action for Failing {
        fn name(&self) -> String {
            "failing".to_string()
        }
        fn supports_execute(&self) -> bool {
            true
        }
        fn execute(&mut self, _ctx: &Context) -> Result<bool, SystemDeployError> {
            Err(SystemDeployError::Validation("boom".to_string()))
        }
    }

    #[test]
    fn reports_updated_when_changed() {
        let mut runner = Runner::new();
        runner
            .add_task("a", vec![Box::new(Toggle { changed: true })], Vec::new())
            .unwrap();
        let report = runner.deploy(&Context::new()).unwrap();
        assert_eq!(report.tasks.len(), 1);
        assert!(report.tasks[0].changed);
        assert!(report.tasks[0].error.is_none());
    }

    #[test]
    fn execute_error_aborts_deploy_before_later_tasks() {
        let mut runner = Runner::new();
        runner.add_task("a", vec![Box::new(Failing)], Vec::new()).unwrap();
        runner
            .add_task("b", vec![Box::new(Toggle { changed: false })], Vec::new())
            .unwrap();
        let report = runner.deploy(&Context::new()).unwrap();
        assert_eq!(report.tasks.len(), 1);
        assert!(report.tasks[0].error.is_some());
        assert!(report.has_failures());
    }

    #[test]
    fn assertion_failure_aborts_prepare() {
        let cond = crate::condition::Condition::new("Always", "always false", |_| Ok(false));
        let instance = Instance {
            condition: Arc::new(cond),
            assertion: true,
            values: vec!["x".to_string()],
        };
        let mut runner = Runner::new();
        runner.add_task("a", Vec::new(), vec![instance]).unwrap();
        let err = runner.deploy(&Context::new()).unwrap_err();
        assert!(matches!(err, SystemDeployError::AssertionFailed { .. }));
    }

    #[test]
    fn condition_failure_disables_task_and_skips_execute() {
        let cond = crate::condition::Condition::new("Always", "always false", |_| Ok(false));
        let instance = Instance {
            condition: Arc::new(cond),
            assertion: false,
            values: vec!["x".to_string()],
        };
        let mut runner = Runner::new();
        runner
            .add_task("a", vec![Box::new(Toggle { changed: true })], vec![instance])
            .unwrap();
        let report = runner.deploy(&Context::new()).unwrap();
        assert_eq!(report.tasks.len(), 1);
        assert!(report.tasks[0].skipped);
    }
}
