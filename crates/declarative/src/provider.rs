//! Provider interface
//!
//! A provider performs the remote side effects for every resource kind it
//! knows about. The engine calls it from worker threads with fully resolved
//! inputs; it never sees deferred values.

use crate::error::ProviderError;
use crate::types::Properties;
use std::collections::{BTreeMap, BTreeSet};

/// Request to provision a new resource
#[derive(Debug, Clone, Copy)]
pub struct CreateRequest<'a> {
    /// Logical id of the node, for naming and diagnostics
    pub id: &'a str,
    pub kind: &'a str,
    pub inputs: &'a Properties,
}

/// Request to change an existing resource in place
#[derive(Debug, Clone, Copy)]
pub struct UpdateRequest<'a> {
    pub id: &'a str,
    pub kind: &'a str,
    pub identity: &'a str,
    pub old_inputs: &'a Properties,
    pub new_inputs: &'a Properties,
    pub old_outputs: &'a Properties,
}

/// Request to tear a resource down
#[derive(Debug, Clone, Copy)]
pub struct DeleteRequest<'a> {
    pub id: &'a str,
    pub kind: &'a str,
    pub identity: &'a str,
    /// Inputs the resource was last provisioned with (empty if unknown)
    pub inputs: &'a Properties,
}

/// What a successful create returns
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    /// Provider-assigned identity of the new resource
    pub identity: String,
    pub outputs: Properties,
}

/// Whether a property change can be applied without a new identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyClass {
    InPlace,
    Replace,
}

/// Remote side of resource provisioning
pub trait Provider: Send + Sync {
    fn create(&self, request: CreateRequest<'_>) -> Result<Created, ProviderError>;

    /// Apply changed inputs; the identity is preserved
    fn update(&self, request: UpdateRequest<'_>) -> Result<Properties, ProviderError>;

    fn delete(&self, request: DeleteRequest<'_>) -> Result<(), ProviderError>;

    /// Classify a property of a resource kind
    fn classify(&self, kind: &str, property: &str) -> PropertyClass;
}

/// Per-kind table of properties that force replacement
///
/// Properties not listed for a kind are changed in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyTable {
    replace: BTreeMap<String, BTreeSet<String>>,
}

impl PropertyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark properties of `kind` as replacement-required
    pub fn with_replace<I, S>(mut self, kind: &str, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_replace(kind, properties);
        self
    }

    /// Replace the replacement-required set for `kind`
    pub fn set_replace<I, S>(&mut self, kind: &str, properties: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replace.insert(
            kind.to_string(),
            properties.into_iter().map(Into::into).collect(),
        );
    }

    pub fn classify(&self, kind: &str, property: &str) -> PropertyClass {
        match self.replace.get(kind) {
            Some(properties) if properties.contains(property) => PropertyClass::Replace,
            _ => PropertyClass::InPlace,
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.replace.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlisted_properties_in_place() {
        let table = PropertyTable::new().with_replace("aws:ec2:Subnet", ["cidr_block", "vpc_id"]);

        assert_eq!(
            table.classify("aws:ec2:Subnet", "cidr_block"),
            PropertyClass::Replace
        );
        assert_eq!(table.classify("aws:ec2:Subnet", "tags"), PropertyClass::InPlace);
        assert_eq!(table.classify("aws:ec2:Vpc", "cidr_block"), PropertyClass::InPlace);
    }

    #[test]
    fn test_set_replace_overrides() {
        let mut table = PropertyTable::new().with_replace("kind", ["a"]);
        table.set_replace("kind", ["b"]);
        assert_eq!(table.classify("kind", "a"), PropertyClass::InPlace);
        assert_eq!(table.classify("kind", "b"), PropertyClass::Replace);
        assert_eq!(table.kinds().count(), 1);
    }
}
