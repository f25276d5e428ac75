//! Deferred values
//!
//! An [`Output`] is either already known or pending on a set of producer
//! nodes. Transformations never block: they build a new pending value that
//! carries the union of its sources' producers, so dependency edges survive
//! any chain of `map`/`zip`/`all`.

use crate::error::OutputError;
use crate::types::{NodeId, Properties};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
enum Availability {
    Known(Value),
    Failed,
}

/// Outputs of completed nodes, as seen by one run or preview.
///
/// Each table has its own generation so that memoized resolutions from a
/// preview are never reused by the run that follows it.
#[derive(Debug)]
pub(crate) struct OutputTable {
    generation: u64,
    entries: HashMap<NodeId, Availability>,
}

impl OutputTable {
    pub(crate) fn new() -> Self {
        Self {
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            entries: HashMap::new(),
        }
    }

    pub(crate) fn insert_known(&mut self, id: NodeId, outputs: Properties) {
        self.entries
            .insert(id, Availability::Known(Value::Object(outputs)));
    }

    pub(crate) fn insert_failed(&mut self, id: NodeId) {
        self.entries.insert(id, Availability::Failed);
    }

    fn lookup(&self, id: &NodeId) -> Result<Value, OutputError> {
        match self.entries.get(id) {
            Some(Availability::Known(value)) => Ok(value.clone()),
            Some(Availability::Failed) => Err(OutputError::ProducerFailed {
                producer: id.clone(),
            }),
            None => Err(OutputError::NotReady {
                producer: id.clone(),
            }),
        }
    }
}

type Compute<T> = Box<dyn Fn(&OutputTable) -> Result<T, OutputError> + Send + Sync>;

struct Deferred<T> {
    compute: Compute<T>,
    memo: Mutex<Option<(u64, Result<T, OutputError>)>>,
}

impl<T: Clone> Deferred<T> {
    fn resolve(&self, table: &OutputTable) -> Result<T, OutputError> {
        if let Some((generation, result)) = &*self.memo() {
            if *generation == table.generation {
                return result.clone();
            }
        }

        let result = (self.compute)(table);
        // Not-ready results are retried once more producers complete
        if !matches!(&result, Err(e) if e.is_not_ready()) {
            *self.memo() = Some((table.generation, result.clone()));
        }
        result
    }

    fn memo(&self) -> MutexGuard<'_, Option<(u64, Result<T, OutputError>)>> {
        match self.memo.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

enum State<T> {
    Resolved(T),
    Pending(Arc<Deferred<T>>),
}

/// A value that may not be known until its producers have been provisioned
pub struct Output<T> {
    producers: BTreeSet<NodeId>,
    state: State<T>,
}

impl<T: Clone> Clone for Output<T> {
    fn clone(&self) -> Self {
        let state = match &self.state {
            State::Resolved(value) => State::Resolved(value.clone()),
            State::Pending(deferred) => State::Pending(Arc::clone(deferred)),
        };
        Self {
            producers: self.producers.clone(),
            state,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Resolved(value) => f.debug_tuple("Resolved").field(value).finish(),
            State::Pending(_) => f.debug_tuple("Pending").field(&self.producers).finish(),
        }
    }
}

impl<T> Output<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// An already-known value
    pub fn resolved(value: T) -> Self {
        Self {
            producers: BTreeSet::new(),
            state: State::Resolved(value),
        }
    }

    fn deferred<F>(producers: BTreeSet<NodeId>, compute: F) -> Self
    where
        F: Fn(&OutputTable) -> Result<T, OutputError> + Send + Sync + 'static,
    {
        Self {
            producers,
            state: State::Pending(Arc::new(Deferred {
                compute: Box::new(compute),
                memo: Mutex::new(None),
            })),
        }
    }

    /// Nodes whose completion this value waits on
    pub fn producers(&self) -> &BTreeSet<NodeId> {
        &self.producers
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, State::Resolved(_))
    }

    /// The value, if it was known at definition time
    pub fn known(&self) -> Option<&T> {
        match &self.state {
            State::Resolved(value) => Some(value),
            State::Pending(_) => None,
        }
    }

    /// Transform the value once it is known.
    ///
    /// `f` runs at most once per resolution. A known value is transformed
    /// immediately.
    pub fn map<U, F>(&self, f: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Like [`map`](Self::map) but the transformation may fail
    pub(crate) fn try_map<U, F>(&self, f: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Result<U, OutputError> + Send + Sync + 'static,
    {
        if let State::Resolved(value) = &self.state {
            if let Ok(mapped) = f(value.clone()) {
                return Output {
                    producers: self.producers.clone(),
                    state: State::Resolved(mapped),
                };
            }
        }

        let source = self.clone();
        Output::deferred(self.producers.clone(), move |table| {
            source.resolve(table).and_then(&f)
        })
    }

    /// Pair this value with another; pending on both producer sets
    pub fn zip<U>(&self, other: &Output<U>) -> Output<(T, U)>
    where
        U: Clone + Send + Sync + 'static,
    {
        let producers = self
            .producers
            .union(&other.producers)
            .cloned()
            .collect::<BTreeSet<_>>();

        if let (Some(a), Some(b)) = (self.known(), other.known()) {
            return Output {
                producers,
                state: State::Resolved((a.clone(), b.clone())),
            };
        }

        let (a, b) = (self.clone(), other.clone());
        Output::deferred(producers, move |table| {
            Ok((a.resolve(table)?, b.resolve(table)?))
        })
    }

    /// Combine many values; resolves once every one of them is known
    pub fn all<I>(outputs: I) -> Output<Vec<T>>
    where
        I: IntoIterator<Item = Output<T>>,
    {
        let outputs = outputs.into_iter().collect::<Vec<_>>();
        let producers = outputs
            .iter()
            .flat_map(|o| o.producers.iter().cloned())
            .collect::<BTreeSet<_>>();

        if outputs.iter().all(Output::is_resolved) {
            let values = outputs
                .iter()
                .filter_map(|o| o.known().cloned())
                .collect();
            return Output {
                producers,
                state: State::Resolved(values),
            };
        }

        Output::deferred(producers, move |table| {
            outputs.iter().map(|o| o.resolve(table)).collect()
        })
    }

    pub(crate) fn resolve(&self, table: &OutputTable) -> Result<T, OutputError> {
        match &self.state {
            State::Resolved(value) => Ok(value.clone()),
            State::Pending(deferred) => deferred.resolve(table),
        }
    }
}

impl Output<Value> {
    /// The full output map of `producer`, known once it completes
    pub fn pending(producer: impl Into<NodeId>) -> Self {
        let producer = producer.into();
        let producers = BTreeSet::from([producer.clone()]);
        Self::deferred(producers, move |table| table.lookup(&producer))
    }

    /// A single property of an object-valued output
    pub fn property(&self, name: &str) -> Output<Value> {
        let name = name.to_string();
        let producer = self
            .producers
            .iter()
            .next()
            .cloned()
            .unwrap_or_else(|| NodeId::new("<literal>"));
        self.try_map(move |value| {
            value
                .get(&name)
                .cloned()
                .ok_or_else(|| OutputError::MissingProperty {
                    producer: producer.clone(),
                    property: name.clone(),
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn outputs(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => Properties::new(),
        }
    }

    #[test]
    fn test_resolved_map_is_eager() {
        let out = Output::resolved(2).map(|v| v * 10);
        assert_eq!(out.known(), Some(&20));
        assert!(out.producers().is_empty());
    }

    #[test]
    fn test_pending_map_resolves_after_producer() {
        let vpc = Output::pending("vpc").property("id");
        let arn = vpc.map(|id| json!(format!("arn:vpc/{}", id.as_str().unwrap_or_default())));
        assert_eq!(arn.producers(), &BTreeSet::from([NodeId::new("vpc")]));

        let mut table = OutputTable::new();
        assert!(arn.resolve(&table).unwrap_err().is_not_ready());

        table.insert_known("vpc".into(), outputs(json!({"id": "vpc-1"})));
        assert_eq!(arn.resolve(&table).unwrap(), json!("arn:vpc/vpc-1"));
    }

    #[test]
    fn test_map_invoked_once_per_resolution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let out = Output::pending("a").map(move |v| {
            counter.fetch_add(1, Ordering::SeqCst);
            v
        });

        let mut table = OutputTable::new();
        table.insert_known("a".into(), Properties::new());
        out.resolve(&table).unwrap();
        out.clone().resolve(&table).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A fresh table (a new run) resolves again
        let mut next = OutputTable::new();
        next.insert_known("a".into(), Properties::new());
        out.resolve(&next).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zip_and_all_union_producers() {
        let a = Output::pending("a");
        let b = Output::pending("b");
        let c = Output::resolved(json!(3));

        let zipped = a.zip(&b);
        assert_eq!(zipped.producers().len(), 2);

        let all = Output::all([a, b, c]);
        let expected: BTreeSet<NodeId> = ["a".into(), "b".into()].into();
        assert_eq!(all.producers(), &expected);

        let mut table = OutputTable::new();
        table.insert_known("a".into(), outputs(json!({"n": 1})));
        table.insert_known("b".into(), outputs(json!({"n": 2})));
        let values = all.resolve(&table).unwrap();
        assert_eq!(values, vec![json!({"n": 1}), json!({"n": 2}), json!(3)]);
    }

    #[test]
    fn test_all_resolved_stays_resolved() {
        let all = Output::all([Output::resolved(1), Output::resolved(2)]);
        assert_eq!(all.known(), Some(&vec![1, 2]));
    }

    #[test]
    fn test_failed_producer_propagates() {
        let derived = Output::pending("storage")
            .property("id")
            .map(|v| v.to_string());
        let mut table = OutputTable::new();
        table.insert_failed("storage".into());

        assert_eq!(
            derived.resolve(&table).unwrap_err(),
            OutputError::ProducerFailed {
                producer: "storage".into()
            }
        );
    }

    #[test]
    fn test_missing_property() {
        let out = Output::pending("vpc").property("arn");
        let mut table = OutputTable::new();
        table.insert_known("vpc".into(), outputs(json!({"id": "vpc-1"})));

        assert!(matches!(
            out.resolve(&table),
            Err(OutputError::MissingProperty { property, .. }) if property == "arn"
        ));
    }
}
