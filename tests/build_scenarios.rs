//! End-to-end build scenarios against the library API

use serde_json::{json, Value};
use stackplan::context::{CUSTOM_DOMAIN, CUSTOM_DOMAIN_ZONE_ID, CUSTOM_DOMAIN_ZONE_NAME};
use stackplan::{
    container_app, AccessGrant, Context, OutputFormat, Properties, Protocol, Reference,
    ResolveWarning, ResourceDescriptor, ResourceKind, Stack, StackError, StackPhase,
};

fn network(stack: &mut Stack, name: &str) -> ResourceDescriptor {
    stack
        .declare(
            ResourceKind::Network,
            name,
            Properties::new().with("cidrBlock", "10.0.0.0/16"),
        )
        .unwrap()
}

fn service_properties(vpc: &str) -> Properties {
    Properties::new()
        .with("network", Reference::new(ResourceKind::Network, vpc, "vpcId"))
        .with("cpu", 256)
        .with("memoryLimitMiB", 512)
        .with(
            "image",
            Properties::new()
                .with("source", "registry")
                .with("location", "nginx:latest"),
        )
        .with("containerPort", 80u16)
}

fn database_properties(vpc: &str) -> Properties {
    Properties::new()
        .with("engine", "aurora-postgresql")
        .with("engineVersion", "11.9")
        .with("network", Reference::new(ResourceKind::Network, vpc, "vpcId"))
}

fn secret_from(cluster: &str) -> Properties {
    Properties::new().with(
        "DB_PASSWORD",
        Properties::new()
            .with(
                "secret",
                Reference::new(ResourceKind::DatabaseCluster, cluster, "credentialsSecretRef"),
            )
            .with("field", "password"),
    )
}

fn deployment_context() -> Context {
    Context::new()
        .with(CUSTOM_DOMAIN, "app.example.com")
        .with(CUSTOM_DOMAIN_ZONE_ID, "Z0123456789")
        .with(CUSTOM_DOMAIN_ZONE_NAME, "example.com")
}

#[test]
fn test_network_database_service_order() {
    let mut stack = Stack::new("scenario");
    network(&mut stack, "N");
    let database = stack
        .declare(ResourceKind::DatabaseCluster, "D", database_properties("N"))
        .unwrap();
    let service = stack
        .declare(
            ResourceKind::ComputeService,
            "S",
            service_properties("N").with("secrets", secret_from("D")),
        )
        .unwrap();
    stack.grant(&service, &database).unwrap();

    let synthesis = stack.synthesize(&Context::new()).unwrap();
    assert_eq!(synthesis.plan.names(), vec!["N", "D", "S"]);
    assert!(synthesis.warnings.is_empty());

    let block = synthesis.manifest.resource("S").unwrap();
    assert!(block.depends_on.contains(&"D".to_string()));
    assert_eq!(
        block.properties["Secrets"]["DB_PASSWORD"]["Secret"],
        json!({ "Fn::GetAtt": ["D", "MasterUserSecret.SecretArn"] })
    );
}

#[test]
fn test_declaration_order_does_not_matter() {
    let mut stack = Stack::new("scenario");
    stack
        .declare(
            ResourceKind::ComputeService,
            "S",
            service_properties("N").with("secrets", secret_from("D")),
        )
        .unwrap();
    stack
        .declare(ResourceKind::DatabaseCluster, "D", database_properties("N"))
        .unwrap();
    network(&mut stack, "N");

    let synthesis = stack.synthesize(&Context::new()).unwrap();
    assert_eq!(synthesis.plan.names(), vec!["N", "D", "S"]);
    // The secret coupling had no declared grant
    assert_eq!(synthesis.warnings.len(), 1);
}

#[test]
fn test_file_system_mount_gets_implicit_grant() {
    let mut stack = Stack::new("scenario");
    network(&mut stack, "Vpc");
    let files = stack
        .declare(
            ResourceKind::FileSystem,
            "Files",
            Properties::new().with("network", Reference::new(ResourceKind::Network, "Vpc", "vpcId")),
        )
        .unwrap();
    stack
        .declare(
            ResourceKind::ComputeService,
            "Web",
            service_properties("Vpc")
                .with(
                    "volumes",
                    vec![Properties::new()
                        .with("name", "data")
                        .with("fileSystemId", files.attr("fileSystemId"))],
                )
                .with(
                    "mountPoints",
                    vec![Properties::new()
                        .with("containerPath", "/data")
                        .with("sourceVolume", "data")],
                ),
        )
        .unwrap();

    let synthesis = stack.synthesize(&Context::new()).unwrap();
    assert_eq!(synthesis.warnings.len(), 1);
    match &synthesis.warnings[0] {
        ResolveWarning::ImplicitGrant {
            source,
            target,
            port,
            ..
        } => {
            assert_eq!(source, "Web");
            assert_eq!(target, "Files");
            assert_eq!(*port, 2049);
        }
    }

    let ingress = &synthesis.manifest.resources["FilesFromWebTcp2049"];
    assert_eq!(ingress.resource_type, "AWS::EC2::SecurityGroupIngress");
    assert_eq!(ingress.properties["FromPort"], json!(2049));
    assert_eq!(
        ingress.properties["GroupId"],
        json!({ "Fn::GetAtt": ["Files", "SecurityGroupId"] })
    );
}

#[test]
fn test_missing_attribute_fails_validation() {
    let mut stack = Stack::new("scenario");
    network(&mut stack, "Vpc");
    stack
        .declare(
            ResourceKind::FileSystem,
            "Files",
            Properties::new().with(
                "network",
                Reference::new(ResourceKind::Network, "Vpc", "privateSubnets"),
            ),
        )
        .unwrap();

    let err = stack.synthesize(&Context::new()).unwrap_err();
    assert!(matches!(err, StackError::Validation { .. }));
    assert_eq!(err.offenders(), vec!["Files", "Vpc"]);
}

#[test]
fn test_reference_cycle_yields_no_manifest() {
    let record = |target: &str| {
        Properties::new()
            .with("hostedZoneId", "Z1")
            .with("recordName", "a.example.com")
            .with("recordType", "CNAME")
            .with(
                "resourceRecords",
                vec![Reference::new(ResourceKind::DnsRecord, target, "fqdn")],
            )
    };

    let mut stack = Stack::new("scenario");
    stack.declare(ResourceKind::DnsRecord, "A", record("B")).unwrap();
    stack.declare(ResourceKind::DnsRecord, "B", record("A")).unwrap();

    let err = stack.resolve().unwrap_err();
    match &err {
        StackError::CyclicDependency { names } => {
            let mut names = names.clone();
            names.sort();
            assert_eq!(names, vec!["A", "B"]);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(stack.phase(), &StackPhase::Rejected(err));
}

#[test]
fn test_custom_grant_between_services() {
    let mut stack = Stack::new("scenario");
    network(&mut stack, "Vpc");
    let api = stack
        .declare(ResourceKind::ComputeService, "Api", service_properties("Vpc"))
        .unwrap();
    let worker = stack
        .declare(ResourceKind::ComputeService, "Worker", service_properties("Vpc"))
        .unwrap();
    stack.grant_on_port(&worker, &api, 9090).unwrap();

    let synthesis = stack.synthesize(&Context::new()).unwrap();
    assert_eq!(synthesis.plan.names(), vec!["Vpc", "Api", "Worker"]);
    let ingress = &synthesis.manifest.resources["ApiFromWorkerTcp9090"];
    assert_eq!(ingress.properties["IpProtocol"], json!("tcp"));
    assert_eq!(ingress.properties["ToPort"], json!(9090));
}

#[test]
fn test_missing_zone_id_fails_before_declaring() {
    let context = Context::new()
        .with(CUSTOM_DOMAIN, "app.example.com")
        .with(CUSTOM_DOMAIN_ZONE_NAME, "example.com");
    let err = container_app("container-app", &context).unwrap_err();
    assert_eq!(
        err,
        StackError::MissingContext {
            key: CUSTOM_DOMAIN_ZONE_ID.to_string()
        }
    );
}

#[test]
fn test_container_app_manifest() {
    let context = deployment_context().with("ipAllowList", json!(["198.51.100.0/24"]));
    let stack = container_app("container-app", &context).unwrap();
    let synthesis = stack.synthesize(&context).unwrap();

    let text = synthesis.manifest.render(OutputFormat::Json).unwrap();
    let manifest: Value = serde_json::from_str(&text).unwrap();
    let resources = manifest["Resources"].as_object().unwrap();

    for (id, resource_type) in [
        ("Service", "AWS::ECS::Service"),
        ("Database", "AWS::RDS::DBCluster"),
        ("EfsFileSystem", "AWS::EFS::FileSystem"),
        ("CloudFrontWafAcl", "AWS::WAFv2::WebACL"),
        ("CloudfrontDistribution", "AWS::CloudFront::Distribution"),
    ] {
        assert_eq!(resources[id]["Type"], json!(resource_type), "{}", id);
    }

    assert_eq!(resources["CloudFrontWafAcl"]["Properties"]["DefaultAction"], json!("block"));
    assert_eq!(
        manifest["Outputs"]["CdnEndpoint"]["Value"],
        json!("https://app.example.com/")
    );
    assert_eq!(
        manifest["Metadata"]["stackplan"]["context"]["customDomain"],
        json!("app.example.com")
    );

    let keys: Vec<&String> = resources.keys().collect();
    let position = |id: &str| keys.iter().position(|k| k.as_str() == id).unwrap();
    assert!(position("Vpc") < position("Database"));
    assert!(position("Database") < position("Service"));
    assert!(position("CustomCertificate") < position("CloudfrontDistribution"));
    assert!(position("CloudfrontDistribution") < position("Route53ARecord"));
}

#[test]
fn test_yaml_manifest_renders() {
    let context = deployment_context();
    let synthesis = container_app("container-app", &context)
        .unwrap()
        .synthesize(&context)
        .unwrap();
    let text = synthesis.manifest.render(OutputFormat::Yaml).unwrap();
    assert!(text.contains("AWS::CloudFront::Distribution"));
    assert!(text.contains("Fn::GetAtt"));
}

#[test]
fn test_tcp_and_udp_grants_on_one_port_both_emitted() {
    let mut stack = Stack::new("scenario");
    network(&mut stack, "Vpc");
    stack
        .declare(ResourceKind::ComputeService, "Api", service_properties("Vpc"))
        .unwrap();
    stack
        .declare(ResourceKind::ComputeService, "Worker", service_properties("Vpc"))
        .unwrap();
    stack
        .add_grant(AccessGrant::new("Worker", "Api").on_port(53))
        .unwrap();
    stack
        .add_grant(
            AccessGrant::new("Worker", "Api")
                .on_port(53)
                .with_protocol(Protocol::Udp),
        )
        .unwrap();

    let synthesis = stack.synthesize(&Context::new()).unwrap();
    let tcp = &synthesis.manifest.resources["ApiFromWorkerTcp53"];
    let udp = &synthesis.manifest.resources["ApiFromWorkerUdp53"];
    assert_eq!(tcp.properties["IpProtocol"], json!("tcp"));
    assert_eq!(udp.properties["IpProtocol"], json!("udp"));
}
