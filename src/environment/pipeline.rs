//! Build pipeline running inside the private subnet
//!
//! The project builds from a GitHub repository with the shared filesystem id
//! and a deployment access token in its environment. The token lives in a
//! SecureString parameter whose value is set out of band.

use super::network::Network;
use super::storage::SharedStorage;
use super::{EnvironmentSpec, kind};
use declarative::{Component, DefinitionError, Input, ResourceRef, Stack};
use serde_json::{Value, json};

const POLICY_VERSION: &str = "2012-10-17";
const BUILD_IMAGE: &str = "aws/codebuild/amazonlinux2-x86_64-standard:2.0";

#[derive(Debug, Clone)]
pub struct BuildPipeline {
    pub component: Component,
    pub token_param: ResourceRef,
    pub role: ResourceRef,
    pub project: ResourceRef,
}

impl BuildPipeline {
    pub fn declare(
        stack: &mut Stack,
        parent: &Component,
        network: &Network,
        storage: &SharedStorage,
        spec: &EnvironmentSpec<'_>,
    ) -> Result<Self, DefinitionError> {
        let mut component = parent.component(stack, kind::PIPELINE, "codebuild").declare()?;
        let project_name = project_name(spec.name);

        let token_param = component
            .resource(stack, kind::PARAMETER, "access-token")
            .input("type", "SecureString")
            .input("value", "none")
            .declare()?;

        let (region, account) = (spec.region.to_string(), spec.account_id.to_string());
        let vpc_policy = component
            .resource(stack, kind::POLICY, "vpc-policy")
            .input(
                "policy",
                network.private_subnet.output("id").map(move |subnet| {
                    let subnet = subnet.as_str().unwrap_or_default();
                    vpc_policy(&region, &account, subnet).to_string()
                }),
            )
            .declare()?;
        let base_policy = component
            .resource(stack, kind::POLICY, "base-policy")
            .input(
                "policy",
                base_policy(spec.region, spec.account_id, &project_name).to_string(),
            )
            .declare()?;
        let service_role_policy = component
            .resource(stack, kind::POLICY, "service-role-policy")
            .input("policy", allow_all_policy().to_string())
            .declare()?;

        let role = component
            .resource(stack, kind::ROLE, "role")
            .input("assume_role_policy", assume_role_policy().to_string())
            .declare()?;

        for (name, policy) in [
            ("vpc-attachment", &vpc_policy),
            ("base-attachment", &base_policy),
            ("service-role-attachment", &service_role_policy),
        ] {
            component
                .resource(stack, kind::POLICY_ATTACHMENT, name)
                .input("policy_arn", policy.output("arn"))
                .input("roles", Input::list([role.output("name")]))
                .declare()?;
        }

        let mut project = component
            .resource(stack, kind::PROJECT, "project")
            .input("description", "Builds and deploys the stack")
            .input("name", project_name.as_str())
            .input(
                "vpc_config",
                Input::object([
                    ("vpc_id", Input::from(network.vpc.output("id"))),
                    ("subnets", Input::list([network.private_subnet.output("id")])),
                    (
                        "security_group_ids",
                        Input::list([network.security_group.output("id")]),
                    ),
                ]),
            )
            .input(
                "source",
                Input::object([
                    ("type", Input::from("GITHUB")),
                    ("location", Input::from(spec.repository)),
                ]),
            )
            .input("artifacts", Input::object([("type", Input::from("NO_ARTIFACTS"))]))
            .input(
                "environment",
                Input::object([
                    ("image", Input::from(BUILD_IMAGE)),
                    ("privileged_mode", Input::from(true)),
                    ("type", Input::from("LINUX_CONTAINER")),
                    ("compute_type", Input::from("BUILD_GENERAL1_SMALL")),
                    (
                        "environment_variables",
                        Input::list([
                            variable("PULUMI_ACCESS_TOKEN", "PARAMETER_STORE", token_param.output("name").into()),
                            variable("FILESYSTEM_ID", "PLAINTEXT", storage.file_system.output("id").into()),
                        ]),
                    ),
                ]),
            )
            .input("service_role", role.output("arn"))
            .depends_on(&network.component);
        if let Some(version) = spec.version {
            project = project.input("source_version", version);
        }
        let project = project.declare()?;

        component.export("pulumi_token_param_name", &token_param.output("name"));

        Ok(Self {
            component,
            token_param,
            role,
            project,
        })
    }
}

/// Name of the build project for an environment
pub fn project_name(environment: &str) -> String {
    format!("{environment}BuildDeploy")
}

fn variable(name: &str, kind: &str, value: Input) -> Input {
    Input::object([
        ("name", Input::from(name)),
        ("type", Input::from(kind)),
        ("value", value),
    ])
}

/// Lets the build attach network interfaces in the private subnet
pub fn vpc_policy(region: &str, account_id: &str, subnet_id: &str) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [
            {
                "Effect": "Allow",
                "Action": [
                    "ec2:CreateNetworkInterface",
                    "ec2:DescribeDhcpOptions",
                    "ec2:DescribeNetworkInterfaces",
                    "ec2:DeleteNetworkInterface",
                    "ec2:DescribeSubnets",
                    "ec2:DescribeSecurityGroups",
                    "ec2:DescribeVpcs",
                ],
                "Resource": "*",
            },
            {
                "Effect": "Allow",
                "Action": ["ec2:CreateNetworkInterfacePermission"],
                "Resource": format!("arn:aws:ec2:{region}:{account_id}:network-interface/*"),
                "Condition": {
                    "StringEquals": {
                        "ec2:Subnet": [format!("arn:aws:ec2:{region}:{account_id}:subnet/{subnet_id}")],
                        "ec2:AuthorizedService": "codebuild.amazonaws.com",
                    }
                },
            },
        ],
    })
}

/// Logs, artifact bucket and test report access for one project
pub fn base_policy(region: &str, account_id: &str, project: &str) -> Value {
    let log_group = format!("arn:aws:logs:{region}:{account_id}:log-group:/aws/codebuild/{project}");
    json!({
        "Version": POLICY_VERSION,
        "Statement": [
            {
                "Effect": "Allow",
                "Resource": [log_group.clone(), format!("{log_group}:*")],
                "Action": ["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
            },
            {
                "Effect": "Allow",
                "Resource": [format!("arn:aws:s3:::codepipeline-{region}-*")],
                "Action": [
                    "s3:PutObject",
                    "s3:GetObject",
                    "s3:GetObjectVersion",
                    "s3:GetBucketAcl",
                    "s3:GetBucketLocation",
                ],
            },
            {
                "Effect": "Allow",
                "Action": [
                    "codebuild:CreateReportGroup",
                    "codebuild:CreateReport",
                    "codebuild:UpdateReport",
                    "codebuild:BatchPutTestCases",
                ],
                "Resource": [format!("arn:aws:codebuild:{region}:{account_id}:report-group/{project}-*")],
            },
        ],
    })
}

fn allow_all_policy() -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [{"Action": "*", "Effect": "Allow", "Resource": "*"}],
    })
}

fn assume_role_policy() -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Effect": "Allow",
            "Principal": {"Service": "codebuild.amazonaws.com"},
            "Action": "sts:AssumeRole",
        }],
    })
}
