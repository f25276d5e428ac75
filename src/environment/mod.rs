//! Development environment composition
//!
//! A VPC, a shared filesystem and a build pipeline, grouped under one
//! component whose outputs are what compute functions need to reach the
//! packages installed on the filesystem.

pub mod compute;
pub mod network;
pub mod pipeline;
pub mod storage;

use declarative::{Component, DefinitionError, Output, Stack};
use serde_json::Value;

pub use compute::function_args;
pub use network::Network;
pub use pipeline::BuildPipeline;
pub use storage::SharedStorage;

/// Resource kinds declared by the environment and the example program
pub mod kind {
    pub const ENVIRONMENT: &str = "nuage:aws:DevelopmentEnvironment";
    pub const NETWORK: &str = "nuage:aws:DevelopmentEnvironment:VPC";
    pub const STORAGE: &str = "nuage:aws:DevelopmentEnvironment:EFS";
    pub const PIPELINE: &str = "nuage:aws:DevelopmentEnvironment:CodeBuild";

    pub const VPC: &str = "aws:ec2:Vpc";
    pub const SUBNET: &str = "aws:ec2:Subnet";
    pub const SECURITY_GROUP: &str = "aws:ec2:SecurityGroup";
    pub const SECURITY_GROUP_RULE: &str = "aws:ec2:SecurityGroupRule";
    pub const INTERNET_GATEWAY: &str = "aws:ec2:InternetGateway";
    pub const ROUTE: &str = "aws:ec2:Route";
    pub const EIP: &str = "aws:ec2:Eip";
    pub const NAT_GATEWAY: &str = "aws:ec2:NatGateway";
    pub const ROUTE_TABLE: &str = "aws:ec2:RouteTable";
    pub const ROUTE_TABLE_ASSOCIATION: &str = "aws:ec2:RouteTableAssociation";

    pub const FILE_SYSTEM: &str = "aws:efs:FileSystem";
    pub const MOUNT_TARGET: &str = "aws:efs:MountTarget";
    pub const ACCESS_POINT: &str = "aws:efs:AccessPoint";

    pub const PARAMETER: &str = "aws:ssm:Parameter";
    pub const POLICY: &str = "aws:iam:Policy";
    pub const ROLE: &str = "aws:iam:Role";
    pub const POLICY_ATTACHMENT: &str = "aws:iam:PolicyAttachment";
    pub const ROLE_POLICY_ATTACHMENT: &str = "aws:iam:RolePolicyAttachment";
    pub const PROJECT: &str = "aws:codebuild:Project";

    pub const FUNCTION: &str = "aws:lambda:Function";
    pub const PERMISSION: &str = "aws:lambda:Permission";
    pub const LOG_GROUP: &str = "aws:cloudwatch:LogGroup";
    pub const REST_API: &str = "aws:apigateway:RestApi";
    pub const API_RESOURCE: &str = "aws:apigateway:Resource";
    pub const METHOD: &str = "aws:apigateway:Method";
    pub const INTEGRATION: &str = "aws:apigateway:Integration";
    pub const DEPLOYMENT: &str = "aws:apigateway:Deployment";
    pub const STAGE: &str = "aws:apigateway:Stage";
}

/// Where the environment lives and what the pipeline builds
#[derive(Debug, Clone)]
pub struct EnvironmentSpec<'a> {
    pub name: &'a str,
    pub repository: &'a str,
    pub version: Option<&'a str>,
    pub region: &'a str,
    pub account_id: &'a str,
}

/// The declared environment and its parts
#[derive(Debug, Clone)]
pub struct DevelopmentEnvironment {
    component: Component,
    pub network: Network,
    pub storage: SharedStorage,
    pub pipeline: BuildPipeline,
}

impl DevelopmentEnvironment {
    /// Output names published by the environment component
    pub const OUTPUTS: [&'static str; 7] = [
        "security_group_id",
        "public_subnet_ids",
        "private_subnet_id",
        "efs_access_point_arn",
        "pulumi_token_param_name",
        "file_system_id",
        "vpc_id",
    ];

    pub fn declare(stack: &mut Stack, spec: &EnvironmentSpec<'_>) -> Result<Self, DefinitionError> {
        let mut component = stack.component(kind::ENVIRONMENT, spec.name).declare()?;

        let network = Network::declare(stack, &component, spec.region)?;
        let storage = SharedStorage::declare(stack, &component, &network)?;
        let pipeline = BuildPipeline::declare(stack, &component, &network, &storage, spec)?;

        component.export("security_group_id", &network.security_group.output("id"));
        component.export("public_subnet_ids", &network.public_subnet_ids());
        component.export("private_subnet_id", &network.private_subnet.output("id"));
        component.export("efs_access_point_arn", &storage.access_point.output("arn"));
        component.export("pulumi_token_param_name", &pipeline.token_param.output("name"));
        component.export("file_system_id", &storage.file_system.output("id"));
        component.export("vpc_id", &network.vpc.output("id"));

        Ok(Self {
            component,
            network,
            storage,
            pipeline,
        })
    }

    /// The grouping component, for `depends_on`
    pub fn component(&self) -> &Component {
        &self.component
    }

    /// A published output. Every name in [`Self::OUTPUTS`] is present.
    pub fn output(&self, name: &str) -> Output<Value> {
        self.component
            .output(name)
            .unwrap_or_else(|| Output::resolved(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{DependencyGraph, NodeId};

    pub(crate) fn spec() -> EnvironmentSpec<'static> {
        EnvironmentSpec {
            name: "ExamplePOC",
            repository: "https://github.com/cloudspeak/brew-install-efs-poc.git",
            version: Some("codebuild"),
            region: "eu-west-1",
            account_id: "123456789012",
        }
    }

    #[test]
    fn test_declares_nested_ids() {
        let mut stack = Stack::new("dev").unwrap();
        let env = DevelopmentEnvironment::declare(&mut stack, &spec()).unwrap();

        assert_eq!(env.component().id().as_str(), "ExamplePOC");
        assert_eq!(env.network.vpc.id.as_str(), "ExamplePOC/vpc/vpc");
        assert_eq!(env.storage.file_system.id.as_str(), "ExamplePOC/efs/file-system");
        assert!(stack.contains(&NodeId::new("ExamplePOC/codebuild/project")));
        for name in DevelopmentEnvironment::OUTPUTS {
            assert!(env.component().output(name).is_some(), "missing output {name}");
        }
    }

    #[test]
    fn test_environment_graph_is_acyclic() {
        let mut stack = Stack::new("dev").unwrap();
        DevelopmentEnvironment::declare(&mut stack, &spec()).unwrap();
        let graph = DependencyGraph::build(&stack).unwrap();
        assert_eq!(graph.len(), stack.resources().len());

        let order = graph.topological_order();
        let position = |id: &str| order.iter().position(|n| n.as_str() == id).unwrap();
        assert!(position("ExamplePOC/vpc/vpc") < position("ExamplePOC/vpc/subnet-a"));
        assert!(position("ExamplePOC/efs/mount-target-2") < position("ExamplePOC/efs/access-point"));
        assert!(position("ExamplePOC/vpc/private-route-table-assoc") < position("ExamplePOC/codebuild/project"));
    }

    #[test]
    fn test_outputs_keep_producers() {
        let mut stack = Stack::new("dev").unwrap();
        let env = DevelopmentEnvironment::declare(&mut stack, &spec()).unwrap();

        let subnets = env.output("public_subnet_ids");
        let producers = subnets
            .producers()
            .iter()
            .map(NodeId::as_str)
            .collect::<Vec<_>>();
        assert_eq!(
            producers,
            vec![
                "ExamplePOC/vpc/subnet-a",
                "ExamplePOC/vpc/subnet-b",
                "ExamplePOC/vpc/subnet-c"
            ]
        );
    }
}
