//! Dependency graph construction and validation
//!
//! Nodes are the stack's resources (components only contribute edges).
//! An edge `a -> b` means `a` must complete before `b` starts. Edges come
//! from two places: outputs referenced in `b`'s inputs (implicit) and
//! `depends_on` declarations, after component inheritance and expansion
//! (explicit).

use crate::error::DefinitionError;
use crate::stack::Stack;
use crate::types::NodeId;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

/// How an edge was introduced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeKind {
    /// From `depends_on`, on the node or inherited from a component
    pub explicit: bool,
    /// From an output referenced in the node's inputs
    pub implicit: bool,
}

/// Validated DAG over a stack's resources
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<NodeId, EdgeKind>,
    index: HashMap<NodeId, NodeIndex>,
}

impl DependencyGraph {
    /// Build and validate the graph for `stack`.
    ///
    /// Checks, in order: unknown references, self-dependencies, cycles.
    pub fn build(stack: &Stack) -> Result<Self, DefinitionError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for decl in stack.resources() {
            index.insert(decl.id.clone(), graph.add_node(decl.id.clone()));
        }

        let mut edges = Vec::new();
        for decl in stack.resources() {
            for dep in effective_explicit(stack, decl.parent.as_ref(), &decl.explicit) {
                for target in expand(stack, &decl.id, dep)? {
                    edges.push((target, decl.id.clone(), true));
                }
            }
            for input in decl.inputs.values() {
                for producer in input.producers() {
                    if stack.resource_decl(&producer).is_none() {
                        return Err(DefinitionError::UnknownReference {
                            from: decl.id.clone(),
                            missing: producer,
                        });
                    }
                    edges.push((producer, decl.id.clone(), false));
                }
            }
        }

        for (name, output) in stack.exports() {
            if let Some(missing) = output
                .producers()
                .iter()
                .find(|p| stack.resource_decl(p).is_none())
            {
                return Err(DefinitionError::UnknownReference {
                    from: NodeId::new(format!("output:{name}")),
                    missing: missing.clone(),
                });
            }
        }

        if let Some((from, _, _)) = edges.iter().find(|(from, to, _)| from == to) {
            return Err(DefinitionError::SelfDependency { id: from.clone() });
        }

        for (from, to, explicit) in edges {
            let (a, b) = (index[&from], index[&to]);
            let edge = match graph.find_edge(a, b) {
                Some(edge) => edge,
                None => graph.add_edge(a, b, EdgeKind::default()),
            };
            let kind = &mut graph[edge];
            if explicit {
                kind.explicit = true;
            } else {
                kind.implicit = true;
            }
        }

        let built = Self { graph, index };
        if let Some(path) = built.find_cycle() {
            return Err(DefinitionError::Cycle { path });
        }

        log::debug!(
            "Built dependency graph: {} nodes, {} edges",
            built.graph.node_count(),
            built.graph.edge_count()
        );
        Ok(built)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// Node ids in declaration order
    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.graph.node_indices().map(|i| &self.graph[i])
    }

    /// Declaration position, used as the scheduling tie-break
    pub fn position(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).map(|i| i.index())
    }

    /// Nodes that must complete before `id`, in declaration order
    pub fn dependencies(&self, id: &NodeId) -> Vec<&NodeId> {
        self.neighbors(id, Direction::Incoming, |_| true)
    }

    /// Nodes that wait on `id`, in declaration order
    pub fn dependents(&self, id: &NodeId) -> Vec<&NodeId> {
        self.neighbors(id, Direction::Outgoing, |_| true)
    }

    /// Dependencies whose outputs `id` reads
    pub fn references(&self, id: &NodeId) -> Vec<&NodeId> {
        self.neighbors(id, Direction::Incoming, |kind| kind.implicit)
    }

    /// All edges as `(before, after, kind)`
    pub fn edges(&self) -> Vec<(&NodeId, &NodeId, EdgeKind)> {
        let mut edges = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = self.graph.edge_endpoints(e)?;
                Some((a, b, self.graph[e]))
            })
            .collect::<Vec<_>>();
        edges.sort_by_key(|(a, b, _)| (b.index(), a.index()));
        edges
            .into_iter()
            .map(|(a, b, kind)| (&self.graph[a], &self.graph[b], kind))
            .collect()
    }

    /// A dependency-respecting order; ties broken by declaration order
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut in_degree = self
            .graph
            .node_indices()
            .map(|i| self.graph.neighbors_directed(i, Direction::Incoming).count())
            .collect::<Vec<_>>();
        let mut ready = self
            .graph
            .node_indices()
            .filter(|i| in_degree[i.index()] == 0)
            .map(Reverse)
            .collect::<BinaryHeap<_>>();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(self.graph[node].clone());
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        order
    }

    fn neighbors(
        &self,
        id: &NodeId,
        direction: Direction,
        filter: impl Fn(&EdgeKind) -> bool,
    ) -> Vec<&NodeId> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut found = self
            .graph
            .edges_directed(node, direction)
            .filter(|e| filter(e.weight()))
            .map(|e| match direction {
                Direction::Incoming => e.source(),
                Direction::Outgoing => e.target(),
            })
            .collect::<Vec<_>>();
        found.sort();
        found.dedup();
        found.into_iter().map(|i| &self.graph[i]).collect()
    }

    /// Depth-first search along "depends on"; returns the first cycle found
    fn find_cycle(&self) -> Option<Vec<NodeId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(
            graph: &DiGraph<NodeId, EdgeKind>,
            node: NodeIndex,
            marks: &mut [Mark],
            stack: &mut Vec<NodeIndex>,
        ) -> Option<Vec<NodeId>> {
            marks[node.index()] = Mark::Active;
            stack.push(node);

            let mut deps = graph
                .neighbors_directed(node, Direction::Incoming)
                .collect::<Vec<_>>();
            deps.sort();
            for dep in deps {
                match marks[dep.index()] {
                    Mark::Active => {
                        let start = stack.iter().position(|n| *n == dep).unwrap_or(0);
                        let mut path = stack[start..]
                            .iter()
                            .map(|n| graph[*n].clone())
                            .collect::<Vec<_>>();
                        path.push(graph[dep].clone());
                        return Some(path);
                    }
                    Mark::New => {
                        if let Some(path) = visit(graph, dep, marks, stack) {
                            return Some(path);
                        }
                    }
                    Mark::Done => {}
                }
            }

            stack.pop();
            marks[node.index()] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::New; self.graph.node_count()];
        let mut stack = Vec::new();
        for node in self.graph.node_indices() {
            if marks[node.index()] == Mark::New {
                if let Some(path) = visit(&self.graph, node, &mut marks, &mut stack) {
                    return Some(path);
                }
            }
        }
        None
    }
}

/// Explicit dependencies of a node: its own, or else those inherited
/// from the nearest enclosing component that declares any
fn effective_explicit<'a>(
    stack: &'a Stack,
    mut parent: Option<&'a NodeId>,
    own: &'a [NodeId],
) -> &'a [NodeId] {
    if !own.is_empty() {
        return own;
    }
    while let Some(id) = parent {
        let Some(component) = stack.component_decl(id) else {
            break;
        };
        if !component.explicit.is_empty() {
            return &component.explicit;
        }
        parent = component.parent.as_ref();
    }
    &[]
}

/// Resolve a dependency to the resources it stands for
fn expand(stack: &Stack, from: &NodeId, dep: &NodeId) -> Result<BTreeSet<NodeId>, DefinitionError> {
    if stack.resource_decl(dep).is_some() {
        return Ok(BTreeSet::from([dep.clone()]));
    }
    let Some(component) = stack.component_decl(dep) else {
        return Err(DefinitionError::UnknownReference {
            from: from.clone(),
            missing: dep.clone(),
        });
    };

    let mut resources = BTreeSet::new();
    for child in &component.children {
        resources.extend(expand(stack, from, child)?);
    }
    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(nodes: Vec<&NodeId>) -> Vec<&str> {
        nodes.into_iter().map(NodeId::as_str).collect()
    }

    #[test]
    fn test_implicit_and_explicit_edges() {
        let mut stack = Stack::new("dev").unwrap();
        let vpc = stack.resource("vpc", "vpc").declare().unwrap();
        let sg = stack
            .resource("sg", "sg")
            .input("vpc_id", vpc.output("id"))
            .declare()
            .unwrap();
        let fs = stack.resource("fs", "fs").declare().unwrap();
        stack
            .resource("mount", "mount")
            .input("file_system_id", fs.output("id"))
            .depends_on(&sg)
            .depends_on(&fs)
            .declare()
            .unwrap();

        let graph = DependencyGraph::build(&stack).unwrap();
        assert_eq!(ids(graph.dependencies(&"mount".into())), vec!["sg", "fs"]);
        assert_eq!(ids(graph.references(&"mount".into())), vec!["fs"]);
        assert_eq!(ids(graph.dependents(&vpc.id)), vec!["sg"]);

        let edges = graph.edges();
        let (_, _, kind) = edges
            .iter()
            .find(|(a, b, _)| a.as_str() == "fs" && b.as_str() == "mount")
            .unwrap();
        assert!(kind.explicit && kind.implicit);
    }

    #[test]
    fn test_two_cycle_rejected() {
        let mut stack = Stack::new("dev").unwrap();
        stack.resource("t", "a").depends_on("b").declare().unwrap();
        stack.resource("t", "b").depends_on("a").declare().unwrap();

        let err = DependencyGraph::build(&stack).unwrap_err();
        assert_eq!(
            err,
            DefinitionError::Cycle {
                path: vec!["a".into(), "b".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_cycle_through_outputs_rejected() {
        let mut stack = Stack::new("dev").unwrap();
        stack
            .resource("t", "a")
            .input("x", crate::output::Output::pending("c").property("id"))
            .declare()
            .unwrap();
        stack.resource("t", "b").depends_on("a").declare().unwrap();
        stack.resource("t", "c").depends_on("b").declare().unwrap();

        let err = DependencyGraph::build(&stack).unwrap_err();
        assert_eq!(err.to_string(), "dependency cycle: a -> c -> b -> a");
    }

    #[test]
    fn test_unknown_reference_checked_first() {
        let mut stack = Stack::new("dev").unwrap();
        stack.resource("t", "a").depends_on("a").declare().unwrap();
        stack.resource("t", "b").depends_on("ghost").declare().unwrap();

        assert_eq!(
            DependencyGraph::build(&stack).unwrap_err(),
            DefinitionError::UnknownReference {
                from: "b".into(),
                missing: "ghost".into()
            }
        );
    }

    #[test]
    fn test_self_dependency() {
        let mut stack = Stack::new("dev").unwrap();
        stack.resource("t", "a").depends_on("a").declare().unwrap();
        assert_eq!(
            DependencyGraph::build(&stack).unwrap_err(),
            DefinitionError::SelfDependency { id: "a".into() }
        );
    }

    #[test]
    fn test_unknown_export_producer() {
        let mut stack = Stack::new("dev").unwrap();
        stack.export("url", &crate::output::Output::pending("api"));
        assert!(matches!(
            DependencyGraph::build(&stack),
            Err(DefinitionError::UnknownReference { .. })
        ));
    }

    #[test]
    fn test_component_dependencies_inherited() {
        let mut stack = Stack::new("dev").unwrap();
        let network = stack.component("network", "network").declare().unwrap();
        let vpc = network.resource(&mut stack, "vpc", "vpc").declare().unwrap();
        let igw = network.resource(&mut stack, "igw", "igw").declare().unwrap();

        let storage = stack
            .component("storage", "storage")
            .depends_on(&network)
            .declare()
            .unwrap();
        let fs = storage.resource(&mut stack, "fs", "fs").declare().unwrap();
        let own = stack.resource("t", "standalone").declare().unwrap();
        let target = storage
            .resource(&mut stack, "target", "target")
            .depends_on(&own)
            .declare()
            .unwrap();

        let graph = DependencyGraph::build(&stack).unwrap();
        // Inherited by the child without dependencies of its own
        assert_eq!(
            ids(graph.dependencies(&fs.id)),
            vec![vpc.id.as_str(), igw.id.as_str()]
        );
        // Not by the child that declares its own
        assert_eq!(ids(graph.dependencies(&target.id)), vec!["standalone"]);
    }

    #[test]
    fn test_nested_component_inherits_through_levels() {
        let mut stack = Stack::new("dev").unwrap();
        let base = stack.resource("t", "base").declare().unwrap();
        let outer = stack.component("c", "outer").depends_on(&base).declare().unwrap();
        let inner = outer.component(&mut stack, "c", "inner").declare().unwrap();
        let leaf = inner.resource(&mut stack, "t", "leaf").declare().unwrap();

        let graph = DependencyGraph::build(&stack).unwrap();
        assert_eq!(ids(graph.dependencies(&leaf.id)), vec!["base"]);
    }

    #[test]
    fn test_topological_order_stable() {
        let mut stack = Stack::new("dev").unwrap();
        stack.resource("t", "late").depends_on("early").declare().unwrap();
        stack.resource("t", "free").declare().unwrap();
        stack.resource("t", "early").declare().unwrap();

        let graph = DependencyGraph::build(&stack).unwrap();
        let order = graph.topological_order();
        let order = order.iter().map(NodeId::as_str).collect::<Vec<_>>();
        assert_eq!(order, vec!["free", "early", "late"]);
        assert_eq!(graph.position(&"early".into()), Some(2));
    }
}
