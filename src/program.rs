//! The example program: a function behind an HTTP API, using packages
//! installed on the development environment's shared filesystem

use crate::config::StackConfig;
use crate::environment::{DevelopmentEnvironment, EnvironmentSpec, function_args, kind};
use declarative::{DefinitionError, Input, Output, Stack};
use serde_json::Value;
use std::collections::BTreeMap;

const LAMBDA_POLICIES: [(&str, &str); 2] = [
    (
        "vpc-access-attach",
        "arn:aws:iam::aws:policy/service-role/AWSLambdaVPCAccessExecutionRole",
    ),
    (
        "cloudwatch-attach",
        "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole",
    ),
];

const STAGE: &str = "dev";

/// Declare the environment and the example API into a new stack
pub fn declare(config: &StackConfig) -> Result<Stack, DefinitionError> {
    let mut stack = Stack::new(&config.name)?;
    let spec = EnvironmentSpec {
        name: &config.environment,
        repository: &config.repository,
        version: config.version.as_deref(),
        region: &config.region,
        account_id: &config.account_id,
    };
    let environment = DevelopmentEnvironment::declare(&mut stack, &spec)?;

    let role = stack
        .resource(kind::ROLE, "function-role")
        .input("assume_role_policy", assume_role_policy().to_string())
        .declare()?;
    for (name, policy_arn) in LAMBDA_POLICIES {
        stack
            .resource(kind::ROLE_POLICY_ATTACHMENT, name)
            .input("policy_arn", policy_arn)
            .input("role", role.output("name"))
            .declare()?;
    }

    let function = stack
        .resource(kind::FUNCTION, "function")
        .input("code", "lambda_no_deps.zip")
        .input("handler", "handler.lambda_handler")
        .input("role", role.output("arn"))
        .input("runtime", "python3.8")
        .input("timeout", 30_u32)
        .inputs(function_args(&environment))
        .depends_on(environment.component())
        .declare()?;

    stack
        .resource(kind::LOG_GROUP, "log-group")
        .input(
            "name",
            function
                .output("name")
                .map(|name| format!("/aws/lambda/{}", text(&name))),
        )
        .declare()?;

    let api = stack.resource(kind::REST_API, "api").declare()?;
    let proxy = stack
        .resource(kind::API_RESOURCE, "api-resource")
        .input("parent_id", api.output("root_resource_id"))
        .input("path_part", "{proxy+}")
        .input("rest_api", api.output("id"))
        .declare()?;

    let region = config.region.clone();
    let invoke_uri = function.output("arn").map(move |arn| {
        format!(
            "arn:aws:apigateway:{region}:lambda:path/2015-03-31/functions/{}/invocations",
            text(&arn)
        )
    });

    let mut routes = Vec::new();
    for (i, resource_id) in [proxy.output("id"), api.output("root_resource_id")]
        .into_iter()
        .enumerate()
    {
        let method = stack
            .resource(kind::METHOD, &format!("method-{i}"))
            .input("http_method", "ANY")
            .input("resource_id", &resource_id)
            .input("api_key_required", false)
            .input("request_parameters", Input::Map(BTreeMap::new()))
            .input("authorization", "NONE")
            .input("rest_api", api.output("id"))
            .declare()?;
        let integration = stack
            .resource(kind::INTEGRATION, &format!("integration-{i}"))
            .input("rest_api", api.output("id"))
            .input("resource_id", &resource_id)
            .input("http_method", method.output("http_method"))
            .input("integration_http_method", "POST")
            .input("type", "AWS_PROXY")
            .input("uri", &invoke_uri)
            .declare()?;
        routes.push(method);
        routes.push(integration);
    }

    let mut deployment = stack
        .resource(kind::DEPLOYMENT, "deployment")
        .input("rest_api", api.output("id"));
    for route in &routes {
        deployment = deployment.depends_on(route);
    }
    let deployment = deployment.declare()?;

    stack
        .resource(kind::STAGE, "stage")
        .input("deployment", deployment.output("id"))
        .input("rest_api", api.output("id"))
        .input("stage_name", STAGE)
        .declare()?;

    stack
        .resource(kind::PERMISSION, "permission")
        .input("action", "lambda:InvokeFunction")
        .input("function", function.output("name"))
        .input("principal", "apigateway.amazonaws.com")
        .input(
            "source_arn",
            api.output("execution_arn")
                .map(|arn| format!("{}/*/*/*", text(&arn))),
        )
        .depends_on(&function)
        .depends_on(&deployment)
        .declare()?;

    for (name, output) in [
        ("file_system_id", "file_system_id"),
        ("vpc_id", "vpc_id"),
        ("public_subnets", "public_subnet_ids"),
        ("private_subnet", "private_subnet_id"),
        ("security_group_id", "security_group_id"),
        ("pulumi_access_token_parameter_name", "pulumi_token_param_name"),
    ] {
        stack.export(name, &environment.output(output));
    }
    let region = config.region.clone();
    stack.export("api_endpoint", &api_endpoint(&api.output("id"), region));

    Ok(stack)
}

fn api_endpoint(api_id: &Output<Value>, region: String) -> Output<String> {
    api_id.map(move |id| format!("https://{}.execute-api.{region}.amazonaws.com/{STAGE}/", text(&id)))
}

fn text(value: &Value) -> &str {
    value.as_str().unwrap_or_default()
}

fn assume_role_policy() -> Value {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Principal": {"Service": "lambda.amazonaws.com"},
            "Effect": "Allow",
            "Sid": "",
        }],
    })
}
