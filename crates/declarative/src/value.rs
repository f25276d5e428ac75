//! Resource inputs
//!
//! Inputs are a closed tree of literals, deferred outputs, lists and maps.
//! Walking the tree yields the producers a node implicitly depends on;
//! resolving it against completed outputs yields plain JSON.

use crate::error::OutputError;
use crate::output::{Output, OutputTable};
use crate::types::{NodeId, Properties};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Placeholder rendered in previews for values only known after provisioning
pub const UNKNOWN: &str = "(known after apply)";

/// One input property value
#[derive(Debug, Clone)]
pub enum Input {
    Literal(Value),
    Output(Output<Value>),
    List(Vec<Input>),
    Map(BTreeMap<String, Input>),
}

impl Input {
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Input>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Input)>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Add every producer reachable from this input to `into`
    pub fn collect_producers(&self, into: &mut BTreeSet<NodeId>) {
        match self {
            Self::Literal(_) => {}
            Self::Output(output) => into.extend(output.producers().iter().cloned()),
            Self::List(items) => items.iter().for_each(|i| i.collect_producers(into)),
            Self::Map(entries) => entries.values().for_each(|i| i.collect_producers(into)),
        }
    }

    pub fn producers(&self) -> BTreeSet<NodeId> {
        let mut producers = BTreeSet::new();
        self.collect_producers(&mut producers);
        producers
    }

    pub(crate) fn resolve(&self, table: &OutputTable) -> Result<Value, OutputError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Output(output) => output.resolve(table),
            Self::List(items) => items
                .iter()
                .map(|i| i.resolve(table))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Self::Map(entries) => entries
                .iter()
                .map(|(k, i)| Ok((k.clone(), i.resolve(table)?)))
                .collect::<Result<Properties, _>>()
                .map(Value::Object),
        }
    }

    /// Resolve what is known, substituting [`UNKNOWN`] for the rest.
    ///
    /// Returns the partial value and whether everything was known.
    pub(crate) fn resolve_partial(&self, table: &OutputTable) -> (Value, bool) {
        match self {
            Self::Literal(value) => (value.clone(), true),
            Self::Output(output) => match output.resolve(table) {
                Ok(value) => (value, true),
                Err(_) => (Value::String(UNKNOWN.to_string()), false),
            },
            Self::List(items) => {
                let mut known = true;
                let values = items
                    .iter()
                    .map(|i| {
                        let (value, k) = i.resolve_partial(table);
                        known &= k;
                        value
                    })
                    .collect();
                (Value::Array(values), known)
            }
            Self::Map(entries) => {
                let mut known = true;
                let values = entries
                    .iter()
                    .map(|(key, i)| {
                        let (value, k) = i.resolve_partial(table);
                        known &= k;
                        (key.clone(), value)
                    })
                    .collect();
                (Value::Object(values), known)
            }
        }
    }
}

/// Resolve a node's full input map
pub(crate) fn resolve_inputs(
    inputs: &BTreeMap<String, Input>,
    table: &OutputTable,
) -> Result<Properties, OutputError> {
    inputs
        .iter()
        .map(|(name, input)| Ok((name.clone(), input.resolve(table)?)))
        .collect()
}

/// Resolve a node's input map for display, with unknowns marked
pub(crate) fn resolve_inputs_partial(
    inputs: &BTreeMap<String, Input>,
    table: &OutputTable,
) -> (Properties, bool) {
    let mut known = true;
    let resolved = inputs
        .iter()
        .map(|(name, input)| {
            let (value, k) = input.resolve_partial(table);
            known &= k;
            (name.clone(), value)
        })
        .collect();
    (resolved, known)
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Self::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Self::Literal(Value::String(value))
    }
}

impl From<bool> for Input {
    fn from(value: bool) -> Self {
        Self::Literal(Value::Bool(value))
    }
}

impl From<i64> for Input {
    fn from(value: i64) -> Self {
        Self::Literal(value.into())
    }
}

impl From<u64> for Input {
    fn from(value: u64) -> Self {
        Self::Literal(value.into())
    }
}

impl From<u32> for Input {
    fn from(value: u32) -> Self {
        Self::Literal(value.into())
    }
}

impl From<f64> for Input {
    fn from(value: f64) -> Self {
        Self::Literal(value.into())
    }
}

impl From<Vec<Input>> for Input {
    fn from(items: Vec<Input>) -> Self {
        Self::List(items)
    }
}

impl From<BTreeMap<String, Input>> for Input {
    fn from(entries: BTreeMap<String, Input>) -> Self {
        Self::Map(entries)
    }
}

// Only plain values convert: an `Output<Output<_>>` has no `Into<Value>`.
impl<T> From<Output<T>> for Input
where
    T: Into<Value> + Clone + Send + Sync + 'static,
{
    fn from(output: Output<T>) -> Self {
        Self::Output(output.map(Into::into))
    }
}

impl<T> From<&Output<T>> for Input
where
    T: Into<Value> + Clone + Send + Sync + 'static,
{
    fn from(output: &Output<T>) -> Self {
        Self::Output(output.map(Into::into))
    }
}
