//! Preview planning
//!
//! Runs the same diff as a real run without calling the provider. Inputs
//! that depend on outputs not yet known (of nodes that would be created or
//! replaced) are shown as unknown, and changes to them are assumed.

use crate::diff::{Decision, decide, fingerprint};
use crate::error::DefinitionError;
use crate::graph::DependencyGraph;
use crate::output::OutputTable;
use crate::provider::Provider;
use crate::stack::Stack;
use crate::state::{StackState, StateEntry};
use crate::types::{ExportValue, NodeId, Operation, Properties};
use crate::value::resolve_inputs_partial;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// One node's predicted operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: NodeId,
    pub kind: String,
    pub operation: Operation,
    /// Whether every input was known at preview time
    pub known: bool,
    pub changed: Vec<String>,
    pub replace_reasons: Vec<String>,
    pub old_inputs: Option<Properties>,
    pub new_inputs: Option<Properties>,
}

/// Predicted operations for a stack, in execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub stack: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Steps that would call the provider
    pub fn changes(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| s.operation.is_change())
    }

    pub fn has_changes(&self) -> bool {
        self.changes().next().is_some()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.steps.iter().filter(|s| s.operation == operation).count()
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id.as_str() == id)
    }
}

/// Predict the operations a run of `stack` against `state` would perform
pub fn preview(
    stack: &Stack,
    state: &StackState,
    provider: &dyn Provider,
) -> Result<Plan, DefinitionError> {
    let graph = DependencyGraph::build(stack)?;
    let mut table = OutputTable::new();
    let mut replaced = HashSet::new();
    let mut steps = Vec::new();

    for id in graph.topological_order() {
        let Some(decl) = stack.resource_decl(&id) else {
            continue;
        };
        let entry = state.entry(&id);
        let (inputs, known) = resolve_inputs_partial(&decl.inputs, &table);
        let forced = graph.references(&id).iter().any(|r| replaced.contains(*r));

        let decision = if known {
            decide(entry, &decl.kind, &inputs, &fingerprint(&inputs), forced, provider)
        } else {
            decide_unknown(entry, &decl.kind, &inputs, provider)
        };
        let operation = decision.operation;

        match operation {
            Operation::Same | Operation::Update => {
                if let Some(entry) = entry {
                    table.insert_known(id.clone(), entry.outputs.clone());
                }
            }
            Operation::Replace => {
                replaced.insert(id.clone());
            }
            _ => {}
        }

        steps.push(PlanStep {
            id: id.clone(),
            kind: decl.kind.clone(),
            operation,
            known,
            changed: decision.changed,
            replace_reasons: decision.replace_reasons,
            old_inputs: entry.map(|e| e.inputs.clone()),
            new_inputs: Some(inputs),
        });

        if operation == Operation::Replace {
            if let Some(entry) = entry {
                steps.push(retire_step(&id, &entry.kind, &entry.inputs));
            }
        }
    }

    for entry in &state.entries {
        for pending in &entry.pending_deletes {
            steps.push(retire_step(&entry.id, &pending.kind, &pending.inputs));
        }
    }

    for entry in teardown_order(state, |id| graph.contains(id)) {
        steps.push(PlanStep {
            id: entry.id.clone(),
            kind: entry.kind.clone(),
            operation: Operation::Delete,
            known: true,
            changed: Vec::new(),
            replace_reasons: Vec::new(),
            old_inputs: Some(entry.inputs.clone()),
            new_inputs: None,
        });
    }

    Ok(Plan {
        stack: stack.name().to_string(),
        steps,
    })
}

fn retire_step(id: &NodeId, kind: &str, inputs: &Properties) -> PlanStep {
    PlanStep {
        id: id.clone(),
        kind: kind.to_string(),
        operation: Operation::DeleteReplaced,
        known: true,
        changed: Vec::new(),
        replace_reasons: Vec::new(),
        old_inputs: Some(inputs.clone()),
        new_inputs: None,
    }
}

/// Like `decide`, for inputs containing unknown values. Unknown values
/// differ from anything stored, so such a node is never unchanged.
fn decide_unknown(
    entry: Option<&StateEntry>,
    kind: &str,
    inputs: &Properties,
    provider: &dyn Provider,
) -> Decision {
    decide(entry, kind, inputs, "", true, provider)
}

/// Entries absent from the desired graph, ordered so that every entry comes
/// after the old-graph dependents that are also being torn down
pub fn teardown_order(state: &StackState, desired: impl Fn(&NodeId) -> bool) -> Vec<&StateEntry> {
    let orphans = state
        .entries
        .iter()
        .filter(|e| !desired(&e.id))
        .collect::<Vec<_>>();
    let mut remaining = orphans.iter().map(|e| &e.id).collect::<BTreeSet<_>>();
    let mut order = Vec::with_capacity(orphans.len());

    while !remaining.is_empty() {
        let next = orphans.iter().find(|e| {
            remaining.contains(&e.id)
                && !orphans
                    .iter()
                    .any(|d| remaining.contains(&d.id) && d.dependencies.contains(&e.id))
        });
        // A cycle in stored dependencies: fall back to stored order
        let next = next.or_else(|| orphans.iter().find(|e| remaining.contains(&e.id)));
        let Some(next) = next else {
            break;
        };
        remaining.remove(&next.id);
        order.push(*next);
    }
    order
}

/// Current stack outputs, computed from stored state without a run
pub fn stack_outputs(stack: &Stack, state: &StackState) -> BTreeMap<String, ExportValue> {
    let mut table = OutputTable::new();
    for entry in &state.entries {
        table.insert_known(entry.id.clone(), entry.outputs.clone());
    }
    resolve_exports(stack, &table)
}

pub(crate) fn resolve_exports(stack: &Stack, table: &OutputTable) -> BTreeMap<String, ExportValue> {
    stack
        .exports()
        .iter()
        .map(|(name, output)| {
            let value = match output.resolve(table) {
                Ok(value) => ExportValue::Resolved(value),
                Err(e) => ExportValue::Unresolved {
                    reason: e.to_string(),
                },
            };
            (name.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingProvider, props, stored};
    use serde_json::json;

    fn network(stack: &mut Stack, cidr: &str) {
        let vpc = stack
            .resource("vpc", "vpc")
            .input("cidr_block", cidr)
            .declare()
            .unwrap();
        stack
            .resource("subnet", "subnet")
            .input("vpc_id", vpc.output("id"))
            .input("cidr_block", "10.0.1.0/24")
            .declare()
            .unwrap();
    }

    #[test]
    fn test_preview_empty_state_creates_everything() {
        let mut stack = Stack::new("dev").unwrap();
        network(&mut stack, "10.0.0.0/16");
        let provider = RecordingProvider::new();

        let plan = preview(&stack, &StackState::new("dev"), &provider).unwrap();
        assert_eq!(plan.count(Operation::Create), 2);
        assert!(!plan.step("subnet").unwrap().known);
        assert!(plan.step("vpc").unwrap().known);
        assert!(provider.events().is_empty());
    }

    #[test]
    fn test_preview_replace_cascades() {
        let mut stack = Stack::new("dev").unwrap();
        network(&mut stack, "10.1.0.0/16");
        let provider = RecordingProvider::new()
            .replace_on("vpc", ["cidr_block"])
            .replace_on("subnet", ["vpc_id"]);

        let mut state = StackState::new("dev");
        state.upsert(stored(
            "vpc",
            "vpc",
            props(json!({"cidr_block": "10.0.0.0/16"})),
            props(json!({"id": "vpc-1"})),
            &[],
        ));
        state.upsert(stored(
            "subnet",
            "subnet",
            props(json!({"vpc_id": "vpc-1", "cidr_block": "10.0.1.0/24"})),
            props(json!({"id": "subnet-1"})),
            &["vpc"],
        ));

        let plan = preview(&stack, &state, &provider).unwrap();
        let ops = plan
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.operation))
            .collect::<Vec<_>>();
        assert_eq!(
            ops,
            vec![
                ("vpc", Operation::Replace),
                ("vpc", Operation::DeleteReplaced),
                ("subnet", Operation::Replace),
                ("subnet", Operation::DeleteReplaced),
            ]
        );
        assert_eq!(plan.step("subnet").unwrap().replace_reasons, vec!["vpc_id"]);
    }

    #[test]
    fn test_preview_unchanged_and_orphans() {
        let mut stack = Stack::new("dev").unwrap();
        stack
            .resource("vpc", "vpc")
            .input("cidr_block", "10.0.0.0/16")
            .declare()
            .unwrap();

        let mut state = StackState::new("dev");
        state.upsert(stored(
            "vpc",
            "vpc",
            props(json!({"cidr_block": "10.0.0.0/16"})),
            props(json!({"id": "vpc-1"})),
            &[],
        ));
        state.upsert(stored("db", "db", Properties::new(), Properties::new(), &[]));
        state.upsert(stored("app", "app", Properties::new(), Properties::new(), &["db"]));

        let plan = preview(&stack, &state, &RecordingProvider::new()).unwrap();
        assert!(plan.has_changes());
        assert_eq!(plan.step("vpc").unwrap().operation, Operation::Same);
        let deletes = plan
            .steps
            .iter()
            .filter(|s| s.operation == Operation::Delete)
            .map(|s| s.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(deletes, vec!["app", "db"]);
    }

    #[test]
    fn test_stack_outputs_from_state() {
        let mut stack = Stack::new("dev").unwrap();
        let vpc = stack.resource("vpc", "vpc").declare().unwrap();
        let subnet = stack.resource("subnet", "subnet").declare().unwrap();
        stack.export("vpc_id", &vpc.output("id"));
        stack.export("subnet_id", &subnet.output("id"));

        let mut state = StackState::new("dev");
        state.upsert(stored("vpc", "vpc", Properties::new(), props(json!({"id": "vpc-1"})), &[]));

        let outputs = stack_outputs(&stack, &state);
        assert_eq!(outputs["vpc_id"], ExportValue::Resolved(json!("vpc-1")));
        assert!(matches!(outputs["subnet_id"], ExportValue::Unresolved { .. }));
    }
}
