//! Compute function wiring
//!
//! Functions that load libraries installed on the shared filesystem need the
//! filesystem mounted, network access to the mount targets, and search paths
//! that include the install prefix.

use super::DevelopmentEnvironment;
use declarative::Input;
use std::collections::BTreeMap;

/// Where functions mount the shared filesystem
pub const MOUNT_PATH: &str = "/mnt/efs";

/// Homebrew prefix relative to the mount
pub const BREW_PREFIX: &str = "lambda_packages/linuxbrew";

const RUNTIME_LIBRARY_PATH: &str =
    "/var/lang/lib:/lib64:/usr/lib64:/var/runtime:/var/runtime/lib:/var/task:/var/task/lib:/opt/lib";
const RUNTIME_PATH: &str = "/var/lang/bin:/usr/local/bin:/usr/bin/:/bin:/opt/bin";

/// `LD_LIBRARY_PATH` with the installed libraries appended
pub fn library_path() -> String {
    format!("{RUNTIME_LIBRARY_PATH}:{MOUNT_PATH}/{BREW_PREFIX}/lib")
}

/// `PATH` with the installed binaries appended
pub fn binary_path() -> String {
    format!("{RUNTIME_PATH}:{MOUNT_PATH}/{BREW_PREFIX}/bin")
}

/// Inputs a function needs to use packages installed in `environment`.
///
/// Spread them into a resource with [`ResourceBuilder::inputs`]; they take
/// the `vpc_config`, `file_system_config` and `environment` properties.
///
/// [`ResourceBuilder::inputs`]: declarative::ResourceBuilder::inputs
pub fn function_args(environment: &DevelopmentEnvironment) -> BTreeMap<String, Input> {
    let mut args = BTreeMap::new();
    args.insert(
        "vpc_config".to_string(),
        Input::object([
            (
                "security_group_ids",
                Input::list([environment.output("security_group_id")]),
            ),
            ("subnet_ids", Input::from(environment.output("public_subnet_ids"))),
        ]),
    );
    args.insert(
        "file_system_config".to_string(),
        Input::object([
            ("arn", Input::from(environment.output("efs_access_point_arn"))),
            ("local_mount_path", Input::from(MOUNT_PATH)),
        ]),
    );
    args.insert(
        "environment".to_string(),
        Input::object([(
            "variables",
            Input::object([
                ("LAMBDA_PACKAGES_PATH", Input::from(MOUNT_PATH)),
                ("LD_LIBRARY_PATH", Input::from(library_path())),
                ("PATH", Input::from(binary_path())),
            ]),
        )]),
    );
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentSpec;
    use declarative::Stack;
    use serde_json::Value;

    #[test]
    fn test_search_paths_end_with_prefix() {
        assert!(library_path().ends_with(":/mnt/efs/lambda_packages/linuxbrew/lib"));
        assert!(library_path().starts_with("/var/lang/lib:"));
        assert_eq!(
            binary_path(),
            "/var/lang/bin:/usr/local/bin:/usr/bin/:/bin:/opt/bin:/mnt/efs/lambda_packages/linuxbrew/bin"
        );
    }

    #[test]
    fn test_function_args_reference_environment() {
        let mut stack = Stack::new("dev").unwrap();
        let spec = EnvironmentSpec {
            name: "env",
            repository: "https://example.com/repo.git",
            version: None,
            region: "eu-west-1",
            account_id: "123456789012",
        };
        let environment = DevelopmentEnvironment::declare(&mut stack, &spec).unwrap();
        let args = function_args(&environment);

        assert_eq!(
            args.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["environment", "file_system_config", "vpc_config"]
        );
        let producers = args["vpc_config"].producers();
        assert!(producers.contains(&environment.network.security_group.id));
        assert_eq!(producers.len(), 4);

        let Input::Map(fs) = &args["file_system_config"] else {
            panic!("file_system_config is not a map");
        };
        assert!(matches!(&fs["local_mount_path"], Input::Literal(Value::String(p)) if p == MOUNT_PATH));
        assert!(fs["arn"].producers().contains(&environment.storage.access_point.id));
        assert!(args["environment"].producers().is_empty());
    }
}
