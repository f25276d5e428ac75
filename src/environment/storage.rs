//! Shared EFS filesystem, mounted in every public subnet

use super::kind;
use super::network::Network;
use declarative::{Component, DefinitionError, Input, ResourceRef, Stack};

/// POSIX user and group the access point maps every client to
pub const POSIX_ID: u32 = 1000;

#[derive(Debug, Clone)]
pub struct SharedStorage {
    pub component: Component,
    pub file_system: ResourceRef,
    pub mount_targets: Vec<ResourceRef>,
    pub access_point: ResourceRef,
}

impl SharedStorage {
    pub fn declare(stack: &mut Stack, parent: &Component, network: &Network) -> Result<Self, DefinitionError> {
        let mut component = parent.component(stack, kind::STORAGE, "efs").declare()?;

        let file_system = component
            .resource(stack, kind::FILE_SYSTEM, "file-system")
            .input("encrypted", false)
            .declare()?;

        let mut mount_targets = Vec::with_capacity(network.public_subnets.len());
        for (i, subnet) in network.public_subnets.iter().enumerate() {
            let target = component
                .resource(stack, kind::MOUNT_TARGET, &format!("mount-target-{i}"))
                .input("file_system_id", file_system.output("id"))
                .input("subnet_id", subnet.output("id"))
                .input(
                    "security_groups",
                    Input::list([network.security_group.output("id")]),
                )
                .depends_on(&network.security_group)
                .depends_on(subnet)
                .declare()?;
            mount_targets.push(target);
        }

        // Clients can only mount once every target is available
        let mut access_point = component
            .resource(stack, kind::ACCESS_POINT, "access-point")
            .input("file_system_id", file_system.output("id"))
            .input(
                "posix_user",
                Input::object([("uid", Input::from(POSIX_ID)), ("gid", Input::from(POSIX_ID))]),
            )
            .input(
                "root_directory",
                Input::object([
                    ("path", Input::from("/")),
                    (
                        "creation_info",
                        Input::object([
                            ("owner_gid", Input::from(POSIX_ID)),
                            ("owner_uid", Input::from(POSIX_ID)),
                            ("permissions", Input::from("755")),
                        ]),
                    ),
                ]),
            );
        for target in &mount_targets {
            access_point = access_point.depends_on(target);
        }
        let access_point = access_point.declare()?;

        component.export("file_system_id", &file_system.output("id"));
        component.export("access_point_arn", &access_point.output("arn"));

        Ok(Self {
            component,
            file_system,
            mount_targets,
            access_point,
        })
    }
}
