//! The execution graph: an ordered task list with mask/disable state,
//! ordering queries, before/after hooks, and the prepare/execute phase gate.
//!
//! [`Graph`] owns every task's action sequence plus its `masked`/`disabled`
//! flags (atomic, since actions read and flip them from inside `prepare`/
//! `execute` while the graph itself is threaded through by reference).
//! [`TaskManager`] and [`Hooker`] are the two capability traits actions see
//! during `prepare`; [`crate::runner`] is the only caller of the lower-level
//! accessors ([`Graph::take_actions`], [`Graph::run_before_hooks`], ...).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::actions::Action;
use crate::error::SystemDeployError;

/// A cooperative cancellation flag threaded through prepare, execute, and
/// every subprocess invocation they make.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The execution context threaded through hooks and `Executor::execute`.
///
/// Cloning a `Context` shares the same underlying cancellation flag — a
/// before-hook's returned context chains into the next hook and into
/// `execute` by convention, but since the only mutable state here is the
/// shared cancellation token, a plain clone already has the right effect.
#[derive(Clone, Default)]
pub struct Context {
    pub cancellation: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

pub type BeforeHook = Box<dyn Fn(Context, &str) -> (Context, Result<(), SystemDeployError>) + Send + Sync>;

/// An after-hook payload. Receives read access to [`TaskManager`] (via the
/// owning graph) so on-change handlers can unmask other tasks when they
/// fire — see [`crate::actions::builtin::onchange`].
pub type AfterHook = Box<
    dyn Fn(&dyn TaskManager, &Context, &str, bool, Option<&SystemDeployError>) -> anyhow::Result<()>
        + Send
        + Sync,
>;

/// Structural task operations available to an action's `prepare` step.
pub trait TaskManager {
    fn add_task(&mut self, name: &str, actions: Vec<Box<dyn Action>>) -> Result<(), SystemDeployError>;
    fn mask_task(&self, name: &str) -> Result<(), SystemDeployError>;
    fn unmask_task(&self, name: &str) -> Result<(), SystemDeployError>;
    fn is_masked(&self, name: &str) -> Result<bool, SystemDeployError>;
    fn disable_task(&self, name: &str) -> Result<(), SystemDeployError>;
    fn has_task(&self, name: &str) -> bool;
    fn is_before(&self, a: &str, b: &str) -> Result<bool, SystemDeployError>;
    fn is_after(&self, a: &str, b: &str) -> Result<bool, SystemDeployError>;
}

/// Before/after hook registration available to an action's `prepare` step.
pub trait Hooker {
    fn run_before(&mut self, name: &str, hook: BeforeHook) -> Result<(), SystemDeployError>;
    fn run_after(&mut self, name: &str, hook: AfterHook) -> Result<(), SystemDeployError>;
}

/// The combined capability set `prepare` receives.
pub trait ExecGraph: TaskManager + Hooker {}
impl<T: TaskManager + Hooker> ExecGraph for T {}

struct TaskState {
    name: String,
    actions: Vec<Box<dyn Action>>,
    masked: AtomicBool,
    disabled: AtomicBool,
}

/// The execution graph: tasks in insertion order, plus their hooks.
pub struct Graph {
    tasks: Vec<TaskState>,
    index: HashMap<String, usize>,
    before_hooks: HashMap<String, Vec<BeforeHook>>,
    after_hooks: HashMap<String, Vec<AfterHook>>,
    in_prepare: AtomicBool,
    in_execute: AtomicBool,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            index: HashMap::new(),
            before_hooks: HashMap::new(),
            after_hooks: HashMap::new(),
            in_prepare: AtomicBool::new(false),
            in_execute: AtomicBool::new(false),
        }
    }

    fn resolve(&self, name: &str) -> Result<usize, SystemDeployError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| SystemDeployError::TaskNotExists(name.to_string()))
    }

    /// Task names in insertion (execution) order.
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name.clone()).collect()
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.index
            .get(name)
            .map(|&i| self.tasks[i].disabled.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn set_in_prepare(&self, value: bool) {
        self.in_prepare.store(value, Ordering::SeqCst);
    }

    pub fn set_in_execute(&self, value: bool) {
        self.in_execute.store(value, Ordering::SeqCst);
    }

    /// Temporarily removes a task's actions so the runner can call
    /// `prepare`/`execute` on them with `&mut Graph` available for the
    /// action's own use (the graph can't be mutably borrowed by both the
    /// caller and the contents it owns at once).
    pub fn take_actions(&mut self, name: &str) -> Vec<Box<dyn Action>> {
        match self.index.get(name) {
            Some(&idx) => std::mem::take(&mut self.tasks[idx].actions),
            None => Vec::new(),
        }
    }

    pub fn put_actions(&mut self, name: &str, actions: Vec<Box<dyn Action>>) {
        if let Some(&idx) = self.index.get(name) {
            self.tasks[idx].actions = actions;
        }
    }

    /// Runs every before-hook registered for `name`, in registration order,
    /// chaining the context through. Stops and returns the first error.
    pub fn run_before_hooks(&self, name: &str, mut ctx: Context) -> Result<Context, SystemDeployError> {
        if let Some(hooks) = self.before_hooks.get(name) {
            for hook in hooks {
                let (next_ctx, result) = hook(ctx, name);
                ctx = next_ctx;
                result?;
            }
        }
        Ok(ctx)
    }

    /// Runs every after-hook registered for `name`, in registration order.
    /// Hook errors are swallowed (the caller is expected to log them).
    pub fn run_after_hooks(
        &self,
        name: &str,
        ctx: &Context,
        changed: bool,
        err: Option<&SystemDeployError>,
    ) -> Vec<anyhow::Error> {
        let mut failures = Vec::new();
        if let Some(hooks) = self.after_hooks.get(name) {
            for hook in hooks {
                if let Err(e) = hook(self, ctx, name, changed, err) {
                    failures.push(e);
                }
            }
        }
        failures
    }
}

impl TaskManager for Graph {
    fn add_task(&mut self, name: &str, actions: Vec<Box<dyn Action>>) -> Result<(), SystemDeployError> {
        if self.index.contains_key(name) {
            return Err(SystemDeployError::TaskExists(name.to_string()));
        }
        let idx = self.tasks.len();
        self.tasks.push(TaskState {
            name: name.to_string(),
            actions,
            masked: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
        });
        self.index.insert(name.to_string(), idx);
        Ok(())
    }

    fn mask_task(&self, name: &str) -> Result<(), SystemDeployError> {
        let idx = self.resolve(name)?;
        self.tasks[idx].masked.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unmask_task(&self, name: &str) -> Result<(), SystemDeployError> {
        let idx = self.resolve(name)?;
        self.tasks[idx].masked.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_masked(&self, name: &str) -> Result<bool, SystemDeployError> {
        let idx = self.resolve(name)?;
        Ok(self.tasks[idx].masked.load(Ordering::SeqCst))
    }

    fn disable_task(&self, name: &str) -> Result<(), SystemDeployError> {
        if self.in_execute.load(Ordering::SeqCst) {
            return Err(SystemDeployError::ExecPhase);
        }
        let idx = self.resolve(name)?;
        self.tasks[idx].disabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn has_task(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn is_before(&self, a: &str, b: &str) -> Result<bool, SystemDeployError> {
        let ia = self.resolve(a)?;
        let ib = self.resolve(b)?;
        Ok(ia < ib)
    }

    fn is_after(&self, a: &str, b: &str) -> Result<bool, SystemDeployError> {
        let ia = self.resolve(a)?;
        let ib = self.resolve(b)?;
        Ok(ia > ib)
    }
}

impl Hooker for Graph {
    fn run_before(&mut self, name: &str, hook: BeforeHook) -> Result<(), SystemDeployError> {
        if !self.has_task(name) {
            return Err(SystemDeployError::TaskNotExists(name.to_string()));
        }
        self.before_hooks.entry(name.to_string()).or_default().push(hook);
        Ok(())
    }

    fn run_after(&mut self, name: &str, hook: AfterHook) -> Result<(), SystemDeployError> {
        if !self.has_task(name) {
            return Err(SystemDeployError::TaskNotExists(name.to_string()));
        }
        self.after_hooks.entry(name.to_string()).or_default().push(hook);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_task_rejects_duplicate() {
        let mut g = Graph::new();
        g.add_task("a", Vec::new()).unwrap();
        let err = g.add_task("a", Vec::new()).unwrap_err();
        assert!(matches!(err, SystemDeployError::TaskExists(_)));
    }

    #[test]
    fn ordering_queries_agree() {
        let mut g = Graph::new();
        g.add_task("a", Vec::new()).unwrap();
        g.add_task("b", Vec::new()).unwrap();
        assert!(g.is_before("a", "b").unwrap());
        assert!(!g.is_after("a", "b").unwrap());
        assert!(g.is_after("b", "a").unwrap());
    }

    #[test]
    fn ordering_queries_error_on_missing_task() {
        let mut g = Graph::new();
        g.add_task("a", Vec::new()).unwrap();
        let err = g.is_before("a", "missing").unwrap_err();
        assert!(matches!(err, SystemDeployError::TaskNotExists(_)));
    }

    #[test]
    fn mask_unmask_round_trips() {
        let mut g = Graph::new();
        g.add_task("a", Vec::new()).unwrap();
        assert!(!g.is_masked("a").unwrap());
        g.mask_task("a").unwrap();
        assert!(g.is_masked("a").unwrap());
        g.unmask_task("a").unwrap();
        assert!(!g.is_masked("a").unwrap());
    }

    #[test]
    fn disable_fails_during_execute_phase() {
        let mut g = Graph::new();
        g.add_task("a", Vec::new()).unwrap();
        g.set_in_execute(true);
        let err = g.disable_task("a").unwrap_err();
        assert!(matches!(err, SystemDeployError::ExecPhase));
    }

    #[test]
    fn disable_succeeds_during_prepare_phase() {
        let mut g = Graph::new();
        g.add_task("a", Vec::new()).unwrap();
        g.set_in_prepare(true);
        g.disable_task("a").unwrap();
        assert!(g.is_disabled("a"));
    }

    #[test]
    fn hooks_require_existing_task() {
        let mut g = Graph::new();
        let err = g.run_before("missing", Box::new(|ctx, _| (ctx, Ok(())))).unwrap_err();
        assert!(matches!(err, SystemDeployError::TaskNotExists(_)));
    }

    #[test]
    fn after_hook_runs_and_failures_are_collected_not_propagated() {
        let mut g = Graph::new();
        g.add_task("a", Vec::new()).unwrap();
        g.run_after(
            "a",
            Box::new(|_tm, _ctx, _name, _changed, _err| anyhow::bail!("boom")),
        )
        .unwrap();
        let failures = g.run_after_hooks("a", &Context::new(), true, None);
        assert_eq!(failures.len(), 1);
    }
}
