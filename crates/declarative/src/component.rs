//! Component resources
//!
//! A component groups child resources (and child components) under one id
//! prefix and publishes a table of outputs copied from its children. It has
//! no provider operation of its own; in the graph it only contributes its
//! children and the dependencies they inherit from it.

use crate::error::DefinitionError;
use crate::output::Output;
use crate::resource::{Dependency, ResourceBuilder};
use crate::stack::Stack;
use crate::types::NodeId;
use serde_json::Value;
use std::collections::BTreeMap;

/// A component as declared in a stack
#[derive(Debug, Clone)]
pub struct ComponentDecl {
    pub id: NodeId,
    pub kind: String,
    pub parent: Option<NodeId>,
    pub explicit: Vec<NodeId>,
    /// Direct children (resources and components), in declaration order
    pub children: Vec<NodeId>,
}

/// Handle to a declared component, owning its export table
#[derive(Debug, Clone)]
pub struct Component {
    id: NodeId,
    kind: String,
    exports: BTreeMap<String, Output<Value>>,
}

impl Component {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Declare a resource inside this component
    pub fn resource<'s>(&self, stack: &'s mut Stack, kind: &str, name: &str) -> ResourceBuilder<'s> {
        ResourceBuilder::new(stack, Some(self.id.clone()), kind, name)
    }

    /// Declare a nested component
    pub fn component<'s>(&self, stack: &'s mut Stack, kind: &str, name: &str) -> ComponentBuilder<'s> {
        ComponentBuilder::new(stack, Some(self.id.clone()), kind, name)
    }

    /// Publish an output, keeping the producers of `output`
    pub fn export<T>(&mut self, name: &str, output: &Output<T>)
    where
        T: Into<Value> + Clone + Send + Sync + 'static,
    {
        self.exports.insert(name.to_string(), output.map(Into::into));
    }

    pub fn output(&self, name: &str) -> Option<Output<Value>> {
        self.exports.get(name).cloned()
    }

    pub fn outputs(&self) -> &BTreeMap<String, Output<Value>> {
        &self.exports
    }
}

/// Builder for a component declaration
#[must_use = "a component is only added to the stack by `declare`"]
pub struct ComponentBuilder<'s> {
    stack: &'s mut Stack,
    decl: ComponentDecl,
    name: String,
}

impl<'s> ComponentBuilder<'s> {
    pub(crate) fn new(stack: &'s mut Stack, parent: Option<NodeId>, kind: &str, name: &str) -> Self {
        let id = match &parent {
            Some(parent) => parent.join(name),
            None => NodeId::new(name),
        };
        Self {
            stack,
            decl: ComponentDecl {
                id,
                kind: kind.to_string(),
                parent,
                explicit: Vec::new(),
                children: Vec::new(),
            },
            name: name.to_string(),
        }
    }

    /// Order every child without dependencies of its own after `dependency`
    pub fn depends_on(mut self, dependency: impl Into<Dependency>) -> Self {
        let Dependency(id) = dependency.into();
        if !self.decl.explicit.contains(&id) {
            self.decl.explicit.push(id);
        }
        self
    }

    pub fn declare(self) -> Result<Component, DefinitionError> {
        let Self { stack, decl, name } = self;
        let (id, kind) = (decl.id.clone(), decl.kind.clone());
        stack.add_component(&name, decl)?;
        Ok(Component {
            id,
            kind,
            exports: BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputTable;
    use crate::types::Properties;
    use serde_json::json;

    #[test]
    fn test_children_get_prefixed_ids() {
        let mut stack = Stack::new("dev").unwrap();
        let env = stack.component("nuage:DevelopmentEnvironment", "dev").declare().unwrap();
        let network = env.component(&mut stack, "nuage:Network", "network").declare().unwrap();
        let vpc = network
            .resource(&mut stack, "aws:ec2:Vpc", "vpc")
            .declare()
            .unwrap();

        assert_eq!(network.id().as_str(), "dev/network");
        assert_eq!(vpc.id.as_str(), "dev/network/vpc");

        let decl = stack.component_decl(network.id()).unwrap();
        assert_eq!(decl.children, vec![vpc.id.clone()]);
        assert_eq!(decl.parent.as_ref(), Some(env.id()));
    }

    #[test]
    fn test_child_collision_rejected() {
        let mut stack = Stack::new("dev").unwrap();
        let env = stack.component("env", "dev").declare().unwrap();
        env.resource(&mut stack, "test", "vpc").declare().unwrap();

        let err = env.resource(&mut stack, "test", "vpc").declare().unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateId { id: "dev/vpc".into() });
    }

    #[test]
    fn test_exports_keep_producers() {
        let mut stack = Stack::new("dev").unwrap();
        let mut storage = stack.component("nuage:Storage", "storage").declare().unwrap();
        let fs = storage
            .resource(&mut stack, "aws:efs:FileSystem", "fs")
            .declare()
            .unwrap();
        storage.export("file_system_id", &fs.output("id"));

        let exported = storage.output("file_system_id").unwrap();
        assert!(exported.producers().contains(&fs.id));
        assert!(storage.output("missing").is_none());

        let mut table = OutputTable::new();
        let mut outputs = Properties::new();
        outputs.insert("id".into(), json!("fs-1"));
        table.insert_known(fs.id.clone(), outputs);
        assert_eq!(exported.resolve(&table).unwrap(), json!("fs-1"));
    }
}
