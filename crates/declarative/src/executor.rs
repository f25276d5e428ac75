//! Execution engine - converges a stack against its stored state
//!
//! One coordinator (the calling thread) owns every piece of run state: task
//! statuses, the table of known outputs and the state store. Workers on a
//! bounded rayon pool only perform provider calls, with inputs resolved
//! before dispatch, and report back over a channel.
//!
//! Each task moves `Pending -> Ready -> Running -> {Succeeded, Failed,
//! Skipped}`. There are three kinds of task:
//!
//! - provisioning a node of the desired graph (create, update, replace, or
//!   nothing when inputs are unchanged);
//! - deleting a stored node that is no longer declared, after each of its
//!   old-graph dependents completed its own transition;
//! - retiring the old identity of a replaced node, after every dependent
//!   (in the new and the old graph) has moved over.

use crate::context::{CancelToken, ProgressCallback};
use crate::diff::{decide, fingerprint};
use crate::error::{EngineError, ProviderError, Result};
use crate::graph::DependencyGraph;
use crate::output::OutputTable;
use crate::planner::{self, Plan, resolve_exports, teardown_order};
use crate::provider::{CreateRequest, Created, DeleteRequest, Provider, UpdateRequest};
use crate::retry::with_retry;
use crate::stack::Stack;
use crate::state::{PendingDelete, StackState, StateEntry, StateStore};
use crate::types::{
    AbortReason, NodeId, NodeReport, NodeStatus, Operation, Properties, RunOptions, RunOutcome,
    RunReport, SkipReason,
};
use crate::value::resolve_inputs;
use chrono::Utc;
use rayon::Scope;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// How often the coordinator re-checks cancellation while waiting
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs stacks against a provider
pub struct Engine<'p> {
    provider: &'p dyn Provider,
    options: RunOptions,
    cancel: CancelToken,
}

impl<'p> Engine<'p> {
    pub fn new(provider: &'p dyn Provider, options: RunOptions) -> Self {
        Self {
            provider,
            options,
            cancel: CancelToken::new(),
        }
    }

    /// Use `cancel` to abort runs from elsewhere (e.g. a signal handler)
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Predict the operations of a run without calling the provider
    pub fn preview(&self, stack: &Stack, store: &mut dyn StateStore) -> Result<Plan> {
        let state = store.load()?;
        Ok(planner::preview(stack, &state, self.provider)?)
    }

    /// Converge `stack`: provision what is declared, tear down what is not
    pub fn run(
        &self,
        stack: &Stack,
        store: &mut dyn StateStore,
        progress: &mut dyn ProgressCallback,
    ) -> Result<RunReport> {
        let graph = DependencyGraph::build(stack)?;
        let state = store.load()?;

        let concurrency = self.options.concurrency.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("nuage-worker-{i}"))
            .build()
            .map_err(|e| EngineError::Pool {
                message: e.to_string(),
            })?;

        let cancel = match self.options.timeout {
            Some(timeout) => self.cancel.clone().with_timeout(timeout),
            None => self.cancel.clone(),
        };
        let (tx, rx) = mpsc::channel();
        let worker = Worker {
            provider: self.provider,
            retry: &self.options.retry,
            cancel,
            tx,
            concurrency,
        };

        let mut run = Run::new(stack, &graph, state, store, progress);
        run.plan_tasks();
        log::debug!(
            "Running stack {} with {} tasks, concurrency {}",
            stack.name(),
            run.tasks.len(),
            concurrency
        );

        pool.in_place_scope(|scope| run.drive(scope, &worker, &rx));
        Ok(run.finish())
    }

    /// Tear down everything recorded for `stack_name`
    pub fn destroy(
        &self,
        stack_name: &str,
        store: &mut dyn StateStore,
        progress: &mut dyn ProgressCallback,
    ) -> Result<RunReport> {
        let empty = Stack::new(stack_name)?;
        self.run(&empty, store, progress)
    }
}

/// What workers need; shared by reference with the pool
struct Worker<'a> {
    provider: &'a dyn Provider,
    retry: &'a crate::retry::RetryPolicy,
    cancel: CancelToken,
    tx: Sender<Completion>,
    concurrency: usize,
}

/// A provider call with owned arguments
#[derive(Debug)]
enum Job {
    Create {
        id: NodeId,
        kind: String,
        inputs: Properties,
    },
    Update {
        id: NodeId,
        kind: String,
        identity: String,
        old_inputs: Properties,
        new_inputs: Properties,
        old_outputs: Properties,
    },
    Delete {
        id: NodeId,
        kind: String,
        identity: String,
        inputs: Properties,
    },
}

#[derive(Debug)]
enum Outcome {
    Created(Created),
    Updated(Properties),
    Deleted,
}

impl Job {
    fn call(&self, provider: &dyn Provider) -> std::result::Result<Outcome, ProviderError> {
        match self {
            Self::Create { id, kind, inputs } => provider
                .create(CreateRequest {
                    id: id.as_str(),
                    kind,
                    inputs,
                })
                .map(Outcome::Created),
            Self::Update {
                id,
                kind,
                identity,
                old_inputs,
                new_inputs,
                old_outputs,
            } => provider
                .update(UpdateRequest {
                    id: id.as_str(),
                    kind,
                    identity,
                    old_inputs,
                    new_inputs,
                    old_outputs,
                })
                .map(Outcome::Updated),
            Self::Delete {
                id,
                kind,
                identity,
                inputs,
            } => provider
                .delete(DeleteRequest {
                    id: id.as_str(),
                    kind,
                    identity,
                    inputs,
                })
                .map(|()| Outcome::Deleted),
        }
    }

    fn id(&self) -> &NodeId {
        match self {
            Self::Create { id, .. } | Self::Update { id, .. } | Self::Delete { id, .. } => id,
        }
    }
}

/// Result of a job, sent from a worker to the coordinator
struct Completion {
    task: usize,
    result: std::result::Result<Outcome, ProviderError>,
    attempts: u32,
}

fn spawn<'s>(scope: &Scope<'s>, worker: &Worker<'s>, task: usize, job: Job) {
    let provider = worker.provider;
    let retry = worker.retry.clone();
    let cancel = worker.cancel.clone();
    let tx = worker.tx.clone();
    scope.spawn(move |_| {
        let label = job.id().to_string();
        let (result, attempts) = with_retry(&retry, &cancel, &label, || job.call(provider));
        // The receiver outlives the scope
        let _ = tx.send(Completion {
            task,
            result,
            attempts,
        });
    });
}

#[derive(Debug, Clone)]
enum Work {
    Provision,
    Delete { entry: StateEntry },
    Retire { pending: PendingDelete },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Running,
    Done,
}

/// Operation chosen for a provisioning task at dispatch time
#[derive(Debug, Clone)]
struct Dispatched {
    operation: Operation,
    inputs: Properties,
    fingerprint: String,
}

#[derive(Debug)]
struct Task {
    id: NodeId,
    kind: String,
    work: Work,
    /// Tasks that must be done before this one is ready
    waits_on: Vec<usize>,
    phase: Phase,
    dispatched: Option<Dispatched>,
    report: Option<NodeReport>,
}

impl Task {
    fn new(id: NodeId, kind: String, work: Work) -> Self {
        Self {
            id,
            kind,
            work,
            waits_on: Vec::new(),
            phase: Phase::Pending,
            dispatched: None,
            report: None,
        }
    }

    fn succeeded(&self) -> bool {
        self.report
            .as_ref()
            .is_some_and(|r| r.status.is_success())
    }

    fn is_teardown(&self) -> bool {
        !matches!(self.work, Work::Provision)
    }
}

enum Started {
    Job(Job),
    /// Completed without a provider call
    Inline,
    /// The run was aborted while starting
    Aborted,
}

struct Run<'a> {
    stack: &'a Stack,
    graph: &'a DependencyGraph,
    store: &'a mut dyn StateStore,
    progress: &'a mut dyn ProgressCallback,
    /// State as loaded: the old graph
    initial: StackState,
    /// State as committed so far
    current: StackState,
    tasks: Vec<Task>,
    provision: HashMap<NodeId, usize>,
    deletes: HashMap<NodeId, usize>,
    table: OutputTable,
    replaced: HashSet<NodeId>,
    running: usize,
    abort: Option<AbortReason>,
}

impl<'a> Run<'a> {
    fn new(
        stack: &'a Stack,
        graph: &'a DependencyGraph,
        state: StackState,
        store: &'a mut dyn StateStore,
        progress: &'a mut dyn ProgressCallback,
    ) -> Self {
        Self {
            stack,
            graph,
            store,
            progress,
            current: state.clone(),
            initial: state,
            tasks: Vec::new(),
            provision: HashMap::new(),
            deletes: HashMap::new(),
            table: OutputTable::new(),
            replaced: HashSet::new(),
            running: 0,
            abort: None,
        }
    }

    // ========================================================================
    // Planning
    // ========================================================================

    fn plan_tasks(&mut self) {
        for decl in self.stack.resources() {
            self.provision.insert(decl.id.clone(), self.tasks.len());
            self.tasks
                .push(Task::new(decl.id.clone(), decl.kind.clone(), Work::Provision));
        }
        for i in 0..self.tasks.len() {
            let id = self.tasks[i].id.clone();
            self.tasks[i].waits_on = self
                .graph
                .dependencies(&id)
                .into_iter()
                .filter_map(|dep| self.provision.get(dep).copied())
                .collect();
        }

        // Identities left behind by an earlier replace
        for entry in &self.initial.entries {
            for pending in &entry.pending_deletes {
                self.tasks.push(Task::new(
                    entry.id.clone(),
                    pending.kind.clone(),
                    Work::Retire {
                        pending: pending.clone(),
                    },
                ));
            }
        }

        let orphans = teardown_order(&self.initial, |id| self.graph.contains(id))
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        for entry in orphans {
            self.deletes.insert(entry.id.clone(), self.tasks.len());
            self.tasks.push(Task::new(
                entry.id.clone(),
                entry.kind.clone(),
                Work::Delete { entry },
            ));
        }

        for i in 0..self.tasks.len() {
            if !self.tasks[i].is_teardown() {
                continue;
            }
            let id = self.tasks[i].id.clone();
            let mut waits = self.teardown_waits(&id);
            match self.tasks[i].work {
                Work::Delete { .. } => {
                    // Old identities go before the current one
                    waits.extend(
                        self.tasks
                            .iter()
                            .enumerate()
                            .filter(|(_, t)| t.id == id && matches!(t.work, Work::Retire { .. }))
                            .map(|(j, _)| j),
                    );
                }
                Work::Retire { .. } => {
                    // One operation per node at a time: after the node's own
                    // transition and after earlier leftovers of the same node
                    waits.extend(self.provision.get(&id).copied());
                    waits.extend(
                        self.tasks[..i]
                            .iter()
                            .enumerate()
                            .filter(|(_, t)| t.id == id && matches!(t.work, Work::Retire { .. }))
                            .map(|(j, _)| j),
                    );
                }
                Work::Provision => {}
            }
            self.tasks[i].waits_on = waits.into_iter().collect();
        }

        let total = self.tasks.len();
        self.progress.on_run_start(total);
    }

    /// Tasks that must finish before an identity of `id` is torn down: the
    /// transitions of its dependents in the new and the old graph
    fn teardown_waits(&self, id: &NodeId) -> BTreeSet<usize> {
        let mut dependents = self
            .graph
            .dependents(id)
            .into_iter()
            .cloned()
            .collect::<BTreeSet<_>>();
        dependents.extend(
            self.initial
                .entries
                .iter()
                .filter(|e| &e.id != id && e.dependencies.contains(id))
                .map(|e| e.id.clone()),
        );

        let mut waits = BTreeSet::new();
        for dependent in &dependents {
            waits.extend(self.provision.get(dependent).copied());
            waits.extend(self.deletes.get(dependent).copied());
        }
        waits.extend(
            self.tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| {
                    matches!(t.work, Work::Retire { .. }) && dependents.contains(&t.id)
                })
                .map(|(j, _)| j),
        );
        waits
    }

    /// Schedule teardown of the identity a replace left behind
    fn add_retire(&mut self, id: &NodeId, pending: PendingDelete) {
        let index = self.tasks.len();
        let waits = self.teardown_waits(id);
        let mut task = Task::new(id.clone(), pending.kind.clone(), Work::Retire { pending });
        task.waits_on = waits.into_iter().collect();
        self.tasks.push(task);

        // Teardowns waiting on this node's transition also wait on its old identity
        if let Some(&provision) = self.provision.get(id) {
            for (j, other) in self.tasks.iter_mut().enumerate() {
                if j != index
                    && other.is_teardown()
                    && other.phase == Phase::Pending
                    && other.waits_on.contains(&provision)
                {
                    other.waits_on.push(index);
                }
            }
        }
        log::debug!("Scheduled teardown of replaced {id}");
    }

    // ========================================================================
    // Coordination
    // ========================================================================

    fn drive<'s>(&mut self, scope: &Scope<'s>, worker: &Worker<'s>, rx: &Receiver<Completion>) {
        loop {
            if self.abort.is_none() {
                if let Some(reason) = worker.cancel.check() {
                    log::warn!("Run {reason}; waiting for in-flight operations");
                    self.abort = Some(reason);
                }
            }
            if self.abort.is_none() {
                self.dispatch(scope, worker);
            }

            if self.running == 0 {
                break;
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(completion) => self.complete(completion),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let stranded = self
            .tasks
            .iter()
            .filter(|t| t.phase == Phase::Pending)
            .count();
        if stranded > 0 && self.abort.is_none() {
            log::warn!("{stranded} teardown tasks could not be ordered and were not run");
        }
        for i in 0..self.tasks.len() {
            if self.tasks[i].phase == Phase::Pending {
                self.skip(i, SkipReason::Cancelled);
            }
        }
    }

    /// Start ready tasks until the pool is full or nothing is ready
    fn dispatch<'s>(&mut self, scope: &Scope<'s>, worker: &Worker<'s>) {
        loop {
            let mut progressed = false;
            for i in self.settle() {
                if self.running >= worker.concurrency || self.abort.is_some() {
                    return;
                }
                match self.start(i, worker.provider) {
                    Started::Job(job) => {
                        self.running += 1;
                        spawn(scope, worker, i, job);
                    }
                    Started::Inline => progressed = true,
                    Started::Aborted => return,
                }
            }
            if !progressed {
                return;
            }
        }
    }

    /// Skip tasks blocked by a failure and return the ready ones in order
    fn settle(&mut self) -> Vec<usize> {
        loop {
            let mut ready = Vec::new();
            let mut skipped = false;
            for i in 0..self.tasks.len() {
                let task = &self.tasks[i];
                if task.phase != Phase::Pending
                    || task.waits_on.iter().any(|w| self.tasks[*w].phase != Phase::Done)
                {
                    continue;
                }
                let blocker = task
                    .waits_on
                    .iter()
                    .copied()
                    .find(|w| !self.tasks[*w].succeeded());
                match blocker {
                    Some(blocker) => {
                        let dependency = self.tasks[blocker].id.clone();
                        self.skip(i, SkipReason::DependencyFailed { dependency });
                        skipped = true;
                    }
                    None => ready.push(i),
                }
            }
            if !skipped {
                return ready;
            }
        }
    }

    fn start(&mut self, i: usize, provider: &dyn Provider) -> Started {
        let id = self.tasks[i].id.clone();
        let (operation, job) = match self.tasks[i].work.clone() {
            Work::Provision => match self.prepare(i, provider) {
                Some(prepared) => prepared,
                None => return Started::Inline,
            },
            Work::Delete { entry } => (
                Operation::Delete,
                Job::Delete {
                    id: id.clone(),
                    kind: entry.kind,
                    identity: entry.identity,
                    inputs: entry.inputs,
                },
            ),
            Work::Retire { pending } => (
                Operation::DeleteReplaced,
                Job::Delete {
                    id: id.clone(),
                    kind: pending.kind,
                    identity: pending.identity,
                    inputs: pending.inputs,
                },
            ),
        };

        if let Err(e) = self.store.begin(&id, operation) {
            log::error!("Could not record start of {operation} {id}: {e}");
            self.abort = Some(AbortReason::State {
                message: e.to_string(),
            });
            return Started::Aborted;
        }

        log::info!("{operation} {id}");
        self.tasks[i].phase = Phase::Running;
        self.progress.on_node_start(&id, operation);
        Started::Job(job)
    }

    /// Resolve inputs and choose the operation of a provisioning task.
    ///
    /// Returns `None` when the task completed without a provider call.
    fn prepare(&mut self, i: usize, provider: &dyn Provider) -> Option<(Operation, Job)> {
        let id = self.tasks[i].id.clone();
        let stack = self.stack;
        let Some(decl) = stack.resource_decl(&id) else {
            let error = format!("{id} is not declared in stack {}", stack.name());
            self.finish_task(i, None, NodeStatus::Failed { error }, None, 0);
            return None;
        };

        let inputs = match resolve_inputs(&decl.inputs, &self.table) {
            Ok(inputs) => inputs,
            Err(e) => {
                self.finish_task(i, None, NodeStatus::Failed { error: e.to_string() }, None, 0);
                self.table.insert_failed(id);
                return None;
            }
        };
        let fingerprint = fingerprint(&inputs);
        let forced = self
            .graph
            .references(&id)
            .iter()
            .any(|r| self.replaced.contains(*r));
        let entry = self.current.entry(&id).cloned();
        let decision = decide(
            entry.as_ref(),
            &decl.kind,
            &inputs,
            &fingerprint,
            forced,
            provider,
        );

        let job = match (decision.operation, entry) {
            (Operation::Same, Some(entry)) => {
                log::debug!("{id} unchanged");
                self.table.insert_known(id, entry.outputs);
                self.finish_task(
                    i,
                    Some(Operation::Same),
                    NodeStatus::Succeeded,
                    Some(entry.identity),
                    0,
                );
                return None;
            }
            (Operation::Update, Some(entry)) => Job::Update {
                id: id.clone(),
                kind: decl.kind.clone(),
                identity: entry.identity,
                old_inputs: entry.inputs,
                new_inputs: inputs.clone(),
                old_outputs: entry.outputs,
            },
            _ => Job::Create {
                id: id.clone(),
                kind: decl.kind.clone(),
                inputs: inputs.clone(),
            },
        };
        if !decision.replace_reasons.is_empty() {
            log::debug!(
                "{id} must be replaced: {} changed",
                decision.replace_reasons.join(", ")
            );
        }

        self.tasks[i].dispatched = Some(Dispatched {
            operation: decision.operation,
            inputs,
            fingerprint,
        });
        Some((decision.operation, job))
    }

    // ========================================================================
    // Completion
    // ========================================================================

    fn complete(&mut self, completion: Completion) {
        let Completion {
            task: i,
            result,
            attempts,
        } = completion;
        self.running -= 1;
        let id = self.tasks[i].id.clone();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("{id} failed: {e}");
                let operation = self.operation_of(i);
                self.release(&id);
                if !self.tasks[i].is_teardown() {
                    self.table.insert_failed(id);
                }
                self.finish_task(
                    i,
                    Some(operation),
                    NodeStatus::Failed {
                        error: e.to_string(),
                    },
                    None,
                    attempts,
                );
                return;
            }
        };

        let work = self.tasks[i].work.clone();
        match (work, outcome) {
            (Work::Provision, Outcome::Created(created)) => {
                self.provisioned(i, created.identity, created.outputs, attempts);
            }
            (Work::Provision, Outcome::Updated(outputs)) => {
                let identity = self
                    .current
                    .entry(&id)
                    .map(|e| e.identity.clone())
                    .unwrap_or_default();
                self.provisioned(i, identity, outputs, attempts);
            }
            (Work::Delete { entry }, _) => {
                let status = match self.store.remove(&id) {
                    Ok(()) => {
                        self.current.remove(&id);
                        NodeStatus::Succeeded
                    }
                    Err(e) => self.state_failure(&e),
                };
                self.finish_task(
                    i,
                    Some(Operation::Delete),
                    status,
                    Some(entry.identity),
                    attempts,
                );
            }
            (Work::Retire { pending }, _) => {
                let status = match self.current.entry(&id).cloned() {
                    Some(mut entry) => {
                        entry
                            .pending_deletes
                            .retain(|p| p.identity != pending.identity);
                        self.commit(entry)
                    }
                    None => {
                        self.release(&id);
                        NodeStatus::Succeeded
                    }
                };
                self.finish_task(
                    i,
                    Some(Operation::DeleteReplaced),
                    status,
                    Some(pending.identity),
                    attempts,
                );
            }
            (Work::Provision, Outcome::Deleted) => {
                let operation = self.operation_of(i);
                self.release(&id);
                self.table.insert_failed(id);
                self.finish_task(
                    i,
                    Some(operation),
                    NodeStatus::Failed {
                        error: "provider returned an unexpected result".to_string(),
                    },
                    None,
                    attempts,
                );
            }
        }
    }

    /// Record a successful create, update or replace
    fn provisioned(&mut self, i: usize, identity: String, mut outputs: Properties, attempts: u32) {
        let id = self.tasks[i].id.clone();
        let Some(dispatched) = self.tasks[i].dispatched.take() else {
            return;
        };
        outputs
            .entry("id")
            .or_insert_with(|| Value::String(identity.clone()));

        let previous = self.current.entry(&id).cloned();
        let mut pending_deletes = previous
            .as_ref()
            .map(|e| e.pending_deletes.clone())
            .unwrap_or_default();
        let retired = match (&previous, dispatched.operation) {
            (Some(old), Operation::Replace) => {
                let pending = PendingDelete {
                    identity: old.identity.clone(),
                    kind: old.kind.clone(),
                    inputs: old.inputs.clone(),
                };
                pending_deletes.push(pending.clone());
                Some(pending)
            }
            _ => None,
        };

        let entry = StateEntry {
            id: id.clone(),
            kind: self.tasks[i].kind.clone(),
            fingerprint: dispatched.fingerprint,
            identity: identity.clone(),
            inputs: dispatched.inputs,
            outputs: outputs.clone(),
            dependencies: self.graph.dependencies(&id).into_iter().cloned().collect(),
            pending_deletes,
            updated_at: Utc::now(),
        };
        let status = self.commit(entry);

        if status.is_success() {
            self.table.insert_known(id.clone(), outputs);
            if let Some(pending) = retired {
                self.replaced.insert(id.clone());
                self.add_retire(&id, pending);
            }
        } else {
            self.table.insert_failed(id);
        }
        self.finish_task(
            i,
            Some(dispatched.operation),
            status,
            Some(identity),
            attempts,
        );
    }

    fn commit(&mut self, entry: StateEntry) -> NodeStatus {
        match self.store.commit(entry.clone()) {
            Ok(()) => {
                self.current.upsert(entry);
                NodeStatus::Succeeded
            }
            Err(e) => self.state_failure(&e),
        }
    }

    fn release(&mut self, id: &NodeId) {
        if let Err(e) = self.store.release(id) {
            self.state_failure(&e);
        }
    }

    fn state_failure(&mut self, error: &crate::error::StateError) -> NodeStatus {
        log::error!("State store failure: {error}");
        if self.abort.is_none() {
            self.abort = Some(AbortReason::State {
                message: error.to_string(),
            });
        }
        NodeStatus::Failed {
            error: format!("provisioned, but state was not recorded: {error}"),
        }
    }

    fn operation_of(&self, i: usize) -> Operation {
        match &self.tasks[i].work {
            Work::Provision => self.tasks[i]
                .dispatched
                .as_ref()
                .map_or(Operation::Create, |d| d.operation),
            Work::Delete { .. } => Operation::Delete,
            Work::Retire { .. } => Operation::DeleteReplaced,
        }
    }

    fn skip(&mut self, i: usize, reason: SkipReason) {
        log::debug!("Skipping {}: {reason}", self.tasks[i].id);
        let operation = match self.tasks[i].work {
            Work::Provision => {
                self.table.insert_failed(self.tasks[i].id.clone());
                None
            }
            _ => Some(self.operation_of(i)),
        };
        self.finish_task(i, operation, NodeStatus::Skipped { reason }, None, 0);
    }

    fn finish_task(
        &mut self,
        i: usize,
        operation: Option<Operation>,
        status: NodeStatus,
        identity: Option<String>,
        attempts: u32,
    ) {
        let task = &mut self.tasks[i];
        let identity = identity.or_else(|| match &task.work {
            Work::Delete { entry } => Some(entry.identity.clone()),
            Work::Retire { pending } => Some(pending.identity.clone()),
            Work::Provision => None,
        });
        let report = NodeReport {
            id: task.id.clone(),
            kind: task.kind.clone(),
            operation,
            status,
            identity,
            attempts,
        };
        task.phase = Phase::Done;
        self.progress.on_node_complete(&report);
        task.report = Some(report);
    }

    fn finish(self) -> RunReport {
        let outcome = match self.abort {
            Some(reason) => RunOutcome::Aborted { reason },
            None => RunOutcome::Completed,
        };
        let report = RunReport {
            stack: self.stack.name().to_string(),
            outcome,
            nodes: self.tasks.into_iter().filter_map(|t| t.report).collect(),
            outputs: resolve_exports(self.stack, &self.table),
        };

        let summary = report.summary();
        log::info!(
            "Stack {}: {} created, {} updated, {} replaced, {} deleted, {} unchanged, {} failed, {} skipped",
            report.stack,
            summary.created,
            summary.updated,
            summary.replaced,
            summary.deleted,
            summary.unchanged,
            summary.failed,
            summary.skipped
        );
        self.progress.on_run_complete(&summary);
        report
    }
}
