//! Test doubles shared by the engine's unit tests

use crate::error::ProviderError;
use crate::provider::{
    CreateRequest, Created, DeleteRequest, PropertyClass, PropertyTable, Provider, UpdateRequest,
};
use crate::state::StateEntry;
use crate::types::{NodeId, Properties};
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

pub(crate) fn props(value: Value) -> Properties {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

pub(crate) fn stored(
    id: &str,
    kind: &str,
    inputs: Properties,
    outputs: Properties,
    dependencies: &[&str],
) -> StateEntry {
    StateEntry {
        id: id.into(),
        kind: kind.into(),
        fingerprint: crate::diff::fingerprint(&inputs),
        identity: outputs
            .get("id")
            .and_then(Value::as_str)
            .map_or_else(|| format!("{id}-0"), str::to_string),
        inputs,
        outputs,
        dependencies: dependencies.iter().map(|d| NodeId::new(*d)).collect(),
        pending_deletes: Vec::new(),
        updated_at: Utc::now(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Event {
    pub phase: Phase,
    pub call: Call,
    pub id: String,
    /// Identity targeted (update, delete) or produced (create, on end)
    pub identity: Option<String>,
}

#[derive(Debug, Clone)]
enum Failure {
    Permanent,
    /// Fails transiently this many more times
    Transient(u32),
}

/// Provider that records every call and can be told to fail
///
/// Created resources get identities `<id>-<n>` and echo their inputs as
/// outputs.
pub(crate) struct RecordingProvider {
    table: PropertyTable,
    events: Mutex<Vec<Event>>,
    failures: Mutex<HashMap<(String, Option<String>), Failure>>,
    counter: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Duration,
}

impl RecordingProvider {
    pub(crate) fn new() -> Self {
        Self {
            table: PropertyTable::new(),
            events: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            counter: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    pub(crate) fn replace_on<const N: usize>(mut self, kind: &str, properties: [&str; N]) -> Self {
        self.table.set_replace(kind, properties);
        self
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every call on node `id` fails permanently
    pub(crate) fn fail(&self, id: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert((id.to_string(), None), Failure::Permanent);
    }

    /// Deleting this identity fails permanently
    pub(crate) fn fail_delete_of(&self, identity: &str) {
        self.failures.lock().unwrap().insert(
            (String::new(), Some(identity.to_string())),
            Failure::Permanent,
        );
    }

    /// Calls on node `id` fail transiently `times` times, then succeed
    pub(crate) fn flaky(&self, id: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert((id.to_string(), None), Failure::Transient(times));
    }

    pub(crate) fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Completed calls, in completion order
    pub(crate) fn calls(&self) -> Vec<(Call, String)> {
        self.events()
            .into_iter()
            .filter(|e| e.phase == Phase::End)
            .map(|e| (e.call, e.id))
            .collect()
    }

    /// Position of an event in the log
    pub(crate) fn position(&self, phase: Phase, call: Call, id: &str) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| e.phase == phase && e.call == call && e.id == id)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, phase: Phase, call: Call, id: &str, identity: Option<&str>) {
        self.events.lock().unwrap().push(Event {
            phase,
            call,
            id: id.to_string(),
            identity: identity.map(str::to_string),
        });
    }

    fn check_failure(&self, id: &str, identity: Option<&str>) -> Result<(), ProviderError> {
        let mut failures = self.failures.lock().unwrap();
        let keys = [
            (id.to_string(), None),
            (String::new(), identity.map(str::to_string)),
        ];
        for key in keys {
            match failures.get_mut(&key) {
                Some(Failure::Permanent) => {
                    return Err(ProviderError::new(format!("{id}: injected failure")));
                }
                Some(Failure::Transient(remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    return Err(ProviderError::transient(format!("{id}: throttled")));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn call<T>(
        &self,
        call: Call,
        id: &str,
        identity: Option<&str>,
        body: impl FnOnce() -> T,
    ) -> Result<T, ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.record(Phase::Start, call, id, identity);
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        let result = self.check_failure(id, identity).map(|()| body());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl Provider for RecordingProvider {
    fn create(&self, request: CreateRequest<'_>) -> Result<Created, ProviderError> {
        let created = self.call(Call::Create, request.id, None, || {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let identity = format!("{}-{n}", request.id);
            let mut outputs = request.inputs.clone();
            outputs.insert("arn".into(), json!(format!("arn:{}:{identity}", request.kind)));
            Created { identity, outputs }
        })?;
        self.record(Phase::End, Call::Create, request.id, Some(&created.identity));
        Ok(created)
    }

    fn update(&self, request: UpdateRequest<'_>) -> Result<Properties, ProviderError> {
        let outputs = self.call(Call::Update, request.id, Some(request.identity), || {
            let mut outputs = request.new_inputs.clone();
            if let Some(arn) = request.old_outputs.get("arn") {
                outputs.insert("arn".into(), arn.clone());
            }
            outputs
        })?;
        self.record(Phase::End, Call::Update, request.id, Some(request.identity));
        Ok(outputs)
    }

    fn delete(&self, request: DeleteRequest<'_>) -> Result<(), ProviderError> {
        self.call(Call::Delete, request.id, Some(request.identity), || ())?;
        self.record(Phase::End, Call::Delete, request.id, Some(request.identity));
        Ok(())
    }

    fn classify(&self, kind: &str, property: &str) -> PropertyClass {
        self.table.classify(kind, property)
    }
}
