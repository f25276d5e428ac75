//! Local simulated provider
//!
//! Provisions nothing. Every create fabricates an identity and echoes the
//! inputs back as outputs, plus the attributes other resources commonly read
//! (`id`, `arn`, `name`). A handful of kinds publish extra attributes that the
//! development environment and the example program reference.

use crate::environment::kind;
use chrono::Utc;
use declarative::{
    CreateRequest, Created, DeleteRequest, PropertyClass, PropertyTable, Properties, Provider,
    ProviderError, UpdateRequest,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct LocalProvider {
    region: String,
    account_id: String,
    table: PropertyTable,
    counter: AtomicU64,
}

impl LocalProvider {
    pub fn new(region: &str, account_id: &str, table: PropertyTable) -> Self {
        Self {
            region: region.to_string(),
            account_id: account_id.to_string(),
            table,
            counter: AtomicU64::new(0),
        }
    }

    /// Fresh identity: `{prefix}-{17 hex digits}`
    fn identity(&self, prefix: &str, seed: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let hash = blake3::hash(format!("{seed}:{n}:{stamp}").as_bytes());
        format!("{prefix}-{}", &hash.to_hex()[..17])
    }

    fn arn(&self, kind: &str, identity: &str) -> String {
        let service = kind.split(':').nth(1).unwrap_or("local");
        format!(
            "arn:aws:{service}:{}:{}:{}/{identity}",
            self.region,
            self.account_id,
            type_name(kind).to_lowercase()
        )
    }
}

impl Provider for LocalProvider {
    fn create(&self, request: CreateRequest<'_>) -> Result<Created, ProviderError> {
        let identity = self.identity(&prefix(request.kind), request.id);
        let mut outputs = request.inputs.clone();

        outputs.insert("id".to_string(), Value::String(identity.clone()));
        outputs
            .entry("arn")
            .or_insert_with(|| Value::String(self.arn(request.kind, &identity)));
        outputs.entry("name").or_insert_with(|| {
            let name = request.id.rsplit('/').next().unwrap_or(request.id);
            Value::String(format!("{name}-{}", &identity[identity.len() - 7..]))
        });

        match request.kind {
            kind::VPC => {
                let table = self.identity("rtb", request.id);
                outputs.insert("default_route_table_id".to_string(), Value::String(table));
            }
            kind::REST_API => {
                let root = self.identity("res", request.id);
                outputs.insert("root_resource_id".to_string(), Value::String(root));
                outputs.insert(
                    "execution_arn".to_string(),
                    Value::String(format!(
                        "arn:aws:execute-api:{}:{}:{identity}",
                        self.region, self.account_id
                    )),
                );
            }
            _ => {}
        }

        log::info!("Created {} ({identity})", request.id);
        Ok(Created { identity, outputs })
    }

    fn update(&self, request: UpdateRequest<'_>) -> Result<Properties, ProviderError> {
        let mut outputs = request.old_outputs.clone();
        // Inputs dropped from the declaration go away; generated attributes stay
        for name in request.old_inputs.keys() {
            if !request.new_inputs.contains_key(name) {
                outputs.remove(name);
            }
        }
        for (name, value) in request.new_inputs {
            outputs.insert(name.clone(), value.clone());
        }
        outputs.insert("id".to_string(), Value::String(request.identity.to_string()));

        log::info!("Updated {} ({})", request.id, request.identity);
        Ok(outputs)
    }

    fn delete(&self, request: DeleteRequest<'_>) -> Result<(), ProviderError> {
        log::info!("Deleted {} ({})", request.id, request.identity);
        Ok(())
    }

    fn classify(&self, kind: &str, property: &str) -> PropertyClass {
        self.table.classify(kind, property)
    }
}

/// Last segment of a kind: `aws:ec2:Vpc` -> `Vpc`
fn type_name(kind: &str) -> &str {
    kind.rsplit(':').next().unwrap_or(kind)
}

/// Identity prefix from the type name's capitals: `NatGateway` -> `ng`
fn prefix(kind: &str) -> String {
    let name = type_name(kind);
    let initials = name
        .chars()
        .filter(char::is_ascii_uppercase)
        .collect::<String>()
        .to_lowercase();
    if initials.len() > 1 {
        initials
    } else {
        name.to_lowercase()
    }
}

/// Properties whose change forces a new identity, per kind
pub fn builtin_policy() -> PropertyTable {
    PropertyTable::new()
        .with_replace(kind::VPC, ["cidr_block", "instance_tenancy"])
        .with_replace(kind::SUBNET, ["availability_zone", "cidr_block", "vpc_id"])
        .with_replace(kind::SECURITY_GROUP, ["name", "vpc_id"])
        .with_replace(
            kind::SECURITY_GROUP_RULE,
            [
                "type",
                "protocol",
                "from_port",
                "to_port",
                "cidr_blocks",
                "security_group_id",
                "source_security_group_id",
            ],
        )
        .with_replace(kind::ROUTE, ["route_table_id", "destination_cidr_block"])
        .with_replace(kind::EIP, ["vpc"])
        .with_replace(kind::NAT_GATEWAY, ["subnet_id", "allocation_id"])
        .with_replace(kind::ROUTE_TABLE, ["vpc_id"])
        .with_replace(kind::ROUTE_TABLE_ASSOCIATION, ["subnet_id"])
        .with_replace(kind::FILE_SYSTEM, ["encrypted", "creation_token"])
        .with_replace(kind::MOUNT_TARGET, ["file_system_id", "subnet_id"])
        .with_replace(
            kind::ACCESS_POINT,
            ["file_system_id", "posix_user", "root_directory"],
        )
        .with_replace(kind::PARAMETER, ["name"])
        .with_replace(kind::POLICY, ["name", "path"])
        .with_replace(kind::ROLE, ["name", "path"])
        .with_replace(kind::POLICY_ATTACHMENT, ["name"])
        .with_replace(kind::ROLE_POLICY_ATTACHMENT, ["role", "policy_arn"])
        .with_replace(kind::PROJECT, ["name"])
        .with_replace(kind::FUNCTION, ["name"])
        .with_replace(
            kind::PERMISSION,
            ["action", "function", "principal", "source_arn"],
        )
        .with_replace(kind::LOG_GROUP, ["name"])
        .with_replace(kind::API_RESOURCE, ["parent_id", "path_part", "rest_api"])
        .with_replace(kind::METHOD, ["http_method", "resource_id", "rest_api"])
        .with_replace(kind::INTEGRATION, ["http_method", "resource_id", "rest_api"])
        .with_replace(kind::DEPLOYMENT, ["rest_api"])
        .with_replace(kind::STAGE, ["rest_api", "stage_name"])
}
