//! VPC with three public subnets and one private subnet
//!
//! The first public subnet holds a NAT gateway so the private subnet (where
//! the build pipeline runs) can reach the internet.

use super::kind;
use declarative::{Component, DefinitionError, Input, Output, ResourceRef, Stack};
use serde_json::{Value, json};

pub const CIDR_BLOCK: &str = "172.32.0.0/16";

/// (name, availability zone suffix, cidr)
const PUBLIC_SUBNETS: [(&str, &str, &str); 3] = [
    ("subnet-a", "a", "172.32.0.0/20"),
    ("subnet-b", "b", "172.32.16.0/20"),
    ("subnet-c", "c", "172.32.32.0/20"),
];
const PRIVATE_SUBNET: (&str, &str, &str) = ("private-subnet-a", "a", "172.32.48.0/20");

const ANYWHERE: &str = "0.0.0.0/0";

#[derive(Debug, Clone)]
pub struct Network {
    pub component: Component,
    pub vpc: ResourceRef,
    pub public_subnets: Vec<ResourceRef>,
    pub private_subnet: ResourceRef,
    pub security_group: ResourceRef,
    pub nat_gateway: ResourceRef,
}

impl Network {
    pub fn declare(stack: &mut Stack, parent: &Component, region: &str) -> Result<Self, DefinitionError> {
        let mut component = parent.component(stack, kind::NETWORK, "vpc").declare()?;

        let vpc = component
            .resource(stack, kind::VPC, "vpc")
            .input("cidr_block", CIDR_BLOCK)
            .input("enable_dns_hostnames", true)
            .input("enable_dns_support", true)
            .declare()?;

        let subnet = |stack: &mut Stack, (name, zone, cidr): (&str, &str, &str)| {
            component
                .resource(stack, kind::SUBNET, name)
                .input("availability_zone", format!("{region}{zone}"))
                .input("vpc_id", vpc.output("id"))
                .input("cidr_block", cidr)
                .depends_on(&vpc)
                .declare()
        };
        let public_subnets = PUBLIC_SUBNETS
            .into_iter()
            .map(|s| subnet(stack, s))
            .collect::<Result<Vec<_>, _>>()?;
        let private_subnet = subnet(stack, PRIVATE_SUBNET)?;

        let security_group = component
            .resource(stack, kind::SECURITY_GROUP, "security-group")
            .input("vpc_id", vpc.output("id"))
            .depends_on(&vpc)
            .declare()?;
        let group_id = security_group.output("id");
        let rules = [
            (
                "ssh-rule",
                json!({"type": "ingress", "protocol": "tcp", "from_port": 22, "to_port": 22}),
                ("cidr_blocks", Input::list([ANYWHERE])),
            ),
            (
                "inbound-rule",
                json!({"type": "ingress", "protocol": "all", "from_port": 0, "to_port": 65535}),
                ("source_security_group_id", Input::from(&group_id)),
            ),
            (
                "outbound-rule",
                json!({"type": "egress", "protocol": "all", "from_port": 0, "to_port": 65535}),
                ("cidr_blocks", Input::list([ANYWHERE])),
            ),
        ];
        for (name, settings, (peer, source)) in rules {
            let Value::Object(settings) = settings else {
                continue;
            };
            component
                .resource(stack, kind::SECURITY_GROUP_RULE, name)
                .input("security_group_id", &group_id)
                .inputs(settings)
                .input(peer, source)
                .declare()?;
        }

        let gateway = component
            .resource(stack, kind::INTERNET_GATEWAY, "internet-gateway")
            .input("vpc_id", vpc.output("id"))
            .depends_on(&vpc)
            .declare()?;
        component
            .resource(stack, kind::ROUTE, "gateway-route")
            .input("destination_cidr_block", ANYWHERE)
            .input("gateway_id", gateway.output("id"))
            .input("route_table_id", vpc.output("default_route_table_id"))
            .declare()?;

        let elastic_ip = component
            .resource(stack, kind::EIP, "eip")
            .input("vpc", true)
            .depends_on(&gateway)
            .declare()?;
        let nat_gateway = component
            .resource(stack, kind::NAT_GATEWAY, "nat-gateway")
            .input("subnet_id", public_subnets[0].output("id"))
            .input("allocation_id", elastic_ip.output("id"))
            .depends_on(&public_subnets[0])
            .depends_on(&elastic_ip)
            .declare()?;

        let route_table = component
            .resource(stack, kind::ROUTE_TABLE, "private-route-table")
            .input(
                "routes",
                Input::list([Input::object([
                    ("cidr_block", Input::from(ANYWHERE)),
                    ("nat_gateway_id", Input::from(nat_gateway.output("id"))),
                ])]),
            )
            .input("vpc_id", vpc.output("id"))
            .depends_on(&private_subnet)
            .declare()?;
        component
            .resource(stack, kind::ROUTE_TABLE_ASSOCIATION, "private-route-table-assoc")
            .input("route_table_id", route_table.output("id"))
            .input("subnet_id", private_subnet.output("id"))
            .declare()?;

        component.export("vpc_id", &vpc.output("id"));
        component.export("security_group_id", &security_group.output("id"));
        component.export("public_subnet_ids", &subnet_ids(&public_subnets));
        component.export("private_subnet_id", &private_subnet.output("id"));
        component.export("nat_gateway_id", &nat_gateway.output("id"));

        Ok(Self {
            component,
            vpc,
            public_subnets,
            private_subnet,
            security_group,
            nat_gateway,
        })
    }

    /// Ids of the public subnets, as one list
    pub fn public_subnet_ids(&self) -> Output<Vec<Value>> {
        subnet_ids(&self.public_subnets)
    }
}

fn subnet_ids(subnets: &[ResourceRef]) -> Output<Vec<Value>> {
    Output::all(subnets.iter().map(|s| s.output("id")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{DependencyGraph, NodeId};

    fn declare() -> (Stack, Network) {
        let mut stack = Stack::new("dev").unwrap();
        let env = stack.component(kind::ENVIRONMENT, "env").declare().unwrap();
        let network = Network::declare(&mut stack, &env, "eu-west-1").unwrap();
        (stack, network)
    }

    #[test]
    fn test_subnets_in_region_zones() {
        let (stack, network) = declare();
        let zones = network
            .public_subnets
            .iter()
            .map(|s| {
                let decl = stack.resource_decl(&s.id).unwrap();
                match &decl.inputs["availability_zone"] {
                    Input::Literal(Value::String(zone)) => zone.clone(),
                    other => panic!("unexpected zone {other:?}"),
                }
            })
            .collect::<Vec<_>>();
        assert_eq!(zones, vec!["eu-west-1a", "eu-west-1b", "eu-west-1c"]);
    }

    #[test]
    fn test_nat_gateway_waits_on_subnet_and_eip() {
        let (stack, network) = declare();
        let graph = DependencyGraph::build(&stack).unwrap();
        let deps = graph
            .dependencies(&network.nat_gateway.id)
            .into_iter()
            .map(NodeId::as_str)
            .collect::<Vec<_>>();
        assert_eq!(deps, vec!["env/vpc/subnet-a", "env/vpc/eip"]);
    }

    #[test]
    fn test_inbound_rule_references_own_group() {
        let (stack, network) = declare();
        let rule = stack
            .resource_decl(&NodeId::new("env/vpc/inbound-rule"))
            .unwrap();
        assert!(rule.inputs["source_security_group_id"]
            .producers()
            .contains(&network.security_group.id));
        assert!(network.component.output("nat_gateway_id").is_some());
    }
}
