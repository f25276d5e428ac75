//! Diffing desired inputs against stored state

use crate::provider::{PropertyClass, Provider};
use crate::state::StateEntry;
use crate::types::{Operation, Properties};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Fingerprint of resolved inputs
///
/// `Properties` keeps keys sorted at every level, so equal inputs always
/// serialize to the same bytes.
pub fn fingerprint(inputs: &Properties) -> String {
    let bytes = serde_json::to_vec(inputs).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

/// Properties whose value differs, including added and removed ones
pub fn changed_properties(old: &Properties, new: &Properties) -> Vec<String> {
    old.keys()
        .chain(new.keys())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|key| old.get(*key) != new.get(*key))
        .cloned()
        .collect()
}

/// Operation chosen for a node, with the properties that drove it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub operation: Operation,
    /// Changed input properties
    pub changed: Vec<String>,
    /// Changed properties that cannot be applied in place
    pub replace_reasons: Vec<String>,
}

impl Decision {
    fn of(operation: Operation) -> Self {
        Self {
            operation,
            changed: Vec::new(),
            replace_reasons: Vec::new(),
        }
    }
}

/// Select the operation for a node present in the desired graph
///
/// `forced` marks a node whose referenced dependency was replaced: it is
/// re-provisioned even when its own inputs are unchanged.
pub fn decide(
    entry: Option<&StateEntry>,
    kind: &str,
    inputs: &Properties,
    fingerprint: &str,
    forced: bool,
    provider: &dyn Provider,
) -> Decision {
    let Some(entry) = entry else {
        return Decision::of(Operation::Create);
    };

    let changed = changed_properties(&entry.inputs, inputs);
    if entry.kind != kind {
        return Decision {
            operation: Operation::Replace,
            replace_reasons: vec!["kind".to_string()],
            changed,
        };
    }
    if entry.fingerprint == fingerprint && !forced {
        return Decision::of(Operation::Same);
    }

    let replace_reasons = changed
        .iter()
        .filter(|p| provider.classify(kind, p) == PropertyClass::Replace)
        .cloned()
        .collect::<Vec<_>>();
    let operation = if replace_reasons.is_empty() {
        Operation::Update
    } else {
        Operation::Replace
    };

    Decision {
        operation,
        changed,
        replace_reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingProvider, props};
    use chrono::Utc;
    use serde_json::json;

    fn stored(kind: &str, inputs: &Properties) -> StateEntry {
        StateEntry {
            id: "subnet".into(),
            kind: kind.into(),
            fingerprint: fingerprint(inputs),
            identity: "subnet-1".into(),
            inputs: inputs.clone(),
            outputs: Properties::new(),
            dependencies: Vec::new(),
            pending_deletes: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = props(json!({"a": 1, "b": {"x": 1, "y": 2}}));
        let mut b = Properties::new();
        b.insert("b".into(), json!({"y": 2, "x": 1}));
        b.insert("a".into(), json!(1));
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&props(json!({"a": 2}))));
    }

    #[test]
    fn test_changed_properties() {
        let old = props(json!({"cidr": "10.0.0.0/24", "tags": {"env": "dev"}, "gone": 1}));
        let new = props(json!({"cidr": "10.0.0.0/24", "tags": {"env": "prod"}, "added": true}));
        assert_eq!(changed_properties(&old, &new), vec!["added", "gone", "tags"]);
    }

    #[test]
    fn test_decisions() {
        let provider = RecordingProvider::new().replace_on("subnet", ["cidr"]);
        let old = props(json!({"cidr": "10.0.0.0/24", "tags": "a"}));
        let entry = stored("subnet", &old);

        let decide_for = |inputs: &Properties, forced| {
            decide(Some(&entry), "subnet", inputs, &fingerprint(inputs), forced, &provider)
        };

        assert_eq!(decide_for(&old, false).operation, Operation::Same);
        assert_eq!(decide_for(&old, true).operation, Operation::Update);

        let retagged = props(json!({"cidr": "10.0.0.0/24", "tags": "b"}));
        assert_eq!(decide_for(&retagged, false).operation, Operation::Update);

        let moved = props(json!({"cidr": "10.0.1.0/24", "tags": "a"}));
        let decision = decide_for(&moved, false);
        assert_eq!(decision.operation, Operation::Replace);
        assert_eq!(decision.replace_reasons, vec!["cidr"]);

        let create = decide(None, "subnet", &old, &fingerprint(&old), false, &provider);
        assert_eq!(create.operation, Operation::Create);

        let rekinded = decide(Some(&entry), "other", &old, &fingerprint(&old), false, &provider);
        assert_eq!(rekinded.operation, Operation::Replace);
    }
}
