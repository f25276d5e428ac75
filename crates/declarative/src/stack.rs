//! Stack: the set of declarations a run converges

use crate::component::{ComponentBuilder, ComponentDecl};
use crate::error::DefinitionError;
use crate::output::Output;
use crate::resource::{ResourceBuilder, ResourceDecl, ResourceRef};
use crate::types::NodeId;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Declared resources, components and stack outputs
#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    resources: Vec<ResourceDecl>,
    components: Vec<ComponentDecl>,
    index: HashMap<NodeId, Slot>,
    exports: BTreeMap<String, Output<Value>>,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Resource(usize),
    Component(usize),
}

impl Stack {
    pub fn new(name: &str) -> Result<Self, DefinitionError> {
        validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            resources: Vec::new(),
            components: Vec::new(),
            index: HashMap::new(),
            exports: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a top-level resource
    pub fn resource(&mut self, kind: &str, name: &str) -> ResourceBuilder<'_> {
        ResourceBuilder::new(self, None, kind, name)
    }

    /// Declare a top-level component
    pub fn component(&mut self, kind: &str, name: &str) -> ComponentBuilder<'_> {
        ComponentBuilder::new(self, None, kind, name)
    }

    /// Publish a stack output
    pub fn export<T>(&mut self, name: &str, output: &Output<T>)
    where
        T: Into<Value> + Clone + Send + Sync + 'static,
    {
        self.exports.insert(name.to_string(), output.map(Into::into));
    }

    /// Resources in declaration order
    pub fn resources(&self) -> &[ResourceDecl] {
        &self.resources
    }

    pub fn components(&self) -> &[ComponentDecl] {
        &self.components
    }

    pub fn exports(&self) -> &BTreeMap<String, Output<Value>> {
        &self.exports
    }

    pub fn resource_decl(&self, id: &NodeId) -> Option<&ResourceDecl> {
        match self.index.get(id)? {
            Slot::Resource(i) => self.resources.get(*i),
            Slot::Component(_) => None,
        }
    }

    pub fn component_decl(&self, id: &NodeId) -> Option<&ComponentDecl> {
        match self.index.get(id)? {
            Slot::Component(i) => self.components.get(*i),
            Slot::Resource(_) => None,
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    pub(crate) fn add_resource(
        &mut self,
        name: &str,
        decl: ResourceDecl,
    ) -> Result<ResourceRef, DefinitionError> {
        self.reserve(name, &decl.id, decl.parent.as_ref())?;
        let handle = ResourceRef {
            id: decl.id.clone(),
            kind: decl.kind.clone(),
        };
        self.index
            .insert(decl.id.clone(), Slot::Resource(self.resources.len()));
        self.resources.push(decl);
        Ok(handle)
    }

    pub(crate) fn add_component(
        &mut self,
        name: &str,
        decl: ComponentDecl,
    ) -> Result<(), DefinitionError> {
        self.reserve(name, &decl.id, decl.parent.as_ref())?;
        self.index
            .insert(decl.id.clone(), Slot::Component(self.components.len()));
        self.components.push(decl);
        Ok(())
    }

    /// Validate a new id and register it with its parent
    fn reserve(
        &mut self,
        name: &str,
        id: &NodeId,
        parent: Option<&NodeId>,
    ) -> Result<(), DefinitionError> {
        validate_name(name)?;
        if self.index.contains_key(id) {
            return Err(DefinitionError::DuplicateId { id: id.clone() });
        }
        if let Some(parent) = parent {
            let Some(Slot::Component(i)) = self.index.get(parent).copied() else {
                return Err(DefinitionError::UnknownReference {
                    from: id.clone(),
                    missing: parent.clone(),
                });
            };
            self.components[i].children.push(id.clone());
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), DefinitionError> {
    let reason = if name.is_empty() {
        "name must not be empty"
    } else if name.contains(NodeId::SEPARATOR) {
        "name must not contain '/'"
    } else if name.chars().any(char::is_whitespace) {
        "name must not contain whitespace"
    } else {
        return Ok(());
    };
    Err(DefinitionError::InvalidName {
        name: name.to_string(),
        reason,
    })
}
