//! Resource declarations
//!
//! A resource is declared through a [`ResourceBuilder`] obtained from a
//! [`Stack`](crate::Stack) or a [`Component`](crate::Component). Declaring
//! yields a [`ResourceRef`], the handle other declarations use to read the
//! resource's outputs or to order themselves after it.
//!
//! # Example
//!
//! ```ignore
//! use declarative::Stack;
//!
//! let mut stack = Stack::new("dev")?;
//! let vpc = stack
//!     .resource("aws:ec2:Vpc", "vpc")
//!     .input("cidr_block", "172.32.0.0/16")
//!     .declare()?;
//! let subnet = stack
//!     .resource("aws:ec2:Subnet", "subnet-a")
//!     .input("vpc_id", vpc.output("id"))
//!     .declare()?;
//! ```

use crate::error::DefinitionError;
use crate::output::Output;
use crate::stack::Stack;
use crate::types::NodeId;
use crate::value::Input;
use serde_json::Value;
use std::collections::BTreeMap;

/// A resource as declared in a stack
#[derive(Debug, Clone)]
pub struct ResourceDecl {
    pub id: NodeId,
    pub kind: String,
    pub inputs: BTreeMap<String, Input>,
    /// Dependencies declared with `depends_on`, before expansion
    pub explicit: Vec<NodeId>,
    /// Enclosing component, if any
    pub parent: Option<NodeId>,
}

/// An explicit ordering constraint: on a resource or on a whole component
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dependency(pub NodeId);

impl From<&ResourceRef> for Dependency {
    fn from(resource: &ResourceRef) -> Self {
        Self(resource.id.clone())
    }
}

impl From<&crate::component::Component> for Dependency {
    fn from(component: &crate::component::Component) -> Self {
        Self(component.id().clone())
    }
}

impl From<NodeId> for Dependency {
    fn from(id: NodeId) -> Self {
        Self(id)
    }
}

impl From<&str> for Dependency {
    fn from(id: &str) -> Self {
        Self(NodeId::new(id))
    }
}

/// Handle to a declared resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub id: NodeId,
    pub kind: String,
}

impl ResourceRef {
    /// Every output of the resource, as one object
    pub fn outputs(&self) -> Output<Value> {
        Output::pending(self.id.clone())
    }

    /// A single named output of the resource
    pub fn output(&self, name: &str) -> Output<Value> {
        self.outputs().property(name)
    }
}

/// Builder for a resource declaration
#[must_use = "a resource is only added to the stack by `declare`"]
pub struct ResourceBuilder<'s> {
    stack: &'s mut Stack,
    decl: ResourceDecl,
    name: String,
}

impl<'s> ResourceBuilder<'s> {
    pub(crate) fn new(stack: &'s mut Stack, parent: Option<NodeId>, kind: &str, name: &str) -> Self {
        let id = match &parent {
            Some(parent) => parent.join(name),
            None => NodeId::new(name),
        };
        Self {
            stack,
            decl: ResourceDecl {
                id,
                kind: kind.to_string(),
                inputs: BTreeMap::new(),
                explicit: Vec::new(),
                parent,
            },
            name: name.to_string(),
        }
    }

    /// Set one input property
    pub fn input(mut self, name: &str, value: impl Into<Input>) -> Self {
        self.decl.inputs.insert(name.to_string(), value.into());
        self
    }

    /// Set several input properties
    pub fn inputs<K, V, I>(mut self, inputs: I) -> Self
    where
        K: Into<String>,
        V: Into<Input>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.decl
            .inputs
            .extend(inputs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Order this resource after another resource or component
    pub fn depends_on(mut self, dependency: impl Into<Dependency>) -> Self {
        let Dependency(id) = dependency.into();
        if !self.decl.explicit.contains(&id) {
            self.decl.explicit.push(id);
        }
        self
    }

    /// Add the resource to the stack
    pub fn declare(self) -> Result<ResourceRef, DefinitionError> {
        let Self { stack, decl, name } = self;
        stack.add_resource(&name, decl)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::DefinitionError;
    use crate::stack::Stack;

    #[test]
    fn test_declare_and_reference() {
        let mut stack = Stack::new("dev").unwrap();
        let vpc = stack
            .resource("aws:ec2:Vpc", "vpc")
            .input("cidr_block", "172.32.0.0/16")
            .declare()
            .unwrap();
        assert_eq!(vpc.id.as_str(), "vpc");

        let subnet = stack
            .resource("aws:ec2:Subnet", "subnet-a")
            .input("vpc_id", vpc.output("id"))
            .depends_on(&vpc)
            .depends_on(&vpc)
            .declare()
            .unwrap();

        let decl = stack.resource_decl(&subnet.id).unwrap();
        assert_eq!(decl.explicit.len(), 1);
        assert!(decl.inputs["vpc_id"].producers().contains(&vpc.id));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut stack = Stack::new("dev").unwrap();
        stack.resource("test", "a").declare().unwrap();
        let err = stack.resource("other", "a").declare().unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateId { id: "a".into() });
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut stack = Stack::new("dev").unwrap();
        assert!(matches!(
            stack.resource("test", "").declare(),
            Err(DefinitionError::InvalidName { .. })
        ));
        assert!(matches!(
            stack.resource("test", "a/b").declare(),
            Err(DefinitionError::InvalidName { .. })
        ));
    }
}
