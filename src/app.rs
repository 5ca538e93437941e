//! Container App
//!
//! The container application topology: a Fargate service behind a load
//! balancer, backed by an Aurora cluster and an EFS volume, fronted by a
//! CloudFront distribution with a WAF web ACL and Route53 aliases on the
//! custom domain.

use crate::context::{Context, DeploymentSettings};
use crate::error::Result;
use crate::resource::{Properties, PropertyValue, ResourceDescriptor, ResourceKind};
use crate::stack::Stack;

/// Default stack name
pub const DEFAULT_STACK_NAME: &str = "container-app";

/// Hosted zone every CloudFront alias target lives in
pub const CLOUDFRONT_HOSTED_ZONE_ID: &str = "Z2FDTNDATAQYW2";

const CONTAINER_NAME: &str = "web";
const CONTAINER_PORT: u16 = 8080;
const STAGING_VOLUME: &str = "staging";
const RATE_LIMIT: i64 = 250;

/// Database connection settings handed to the service as secrets, as
/// (environment name, field of the cluster credentials secret)
const DATABASE_SECRETS: [(&str, &str); 5] = [
    ("DB_HOST", "host"),
    ("DB_NAME", "dbname"),
    ("DB_PORT", "port"),
    ("DB_USER", "username"),
    ("DB_PASSWORD", "password"),
];

/// Declare the container app on a fresh stack.
///
/// Every context value is read before the first declaration, so a missing
/// key fails the build with nothing declared.
pub fn container_app(stack_name: &str, context: &Context) -> Result<Stack> {
    let settings = DeploymentSettings::from_context(context)?;
    tracing::info!(
        "Declaring container app '{}' for domain {}",
        stack_name,
        settings.custom_domain
    );

    let mut stack = Stack::new(stack_name);
    let lb_domain = format!("lb{}", settings.custom_domain);

    let vpc = stack.declare(
        ResourceKind::Network,
        "Vpc",
        Properties::new()
            .with("cidrBlock", "10.0.0.0/16")
            .with("maxAzs", 2)
            .with("natGateways", 1),
    )?;

    let database = stack.declare(
        ResourceKind::DatabaseCluster,
        "Database",
        Properties::new()
            .with("engine", "aurora-postgresql")
            .with("engineVersion", "11.9")
            .with("defaultDatabaseName", "containerapp")
            .with("network", vpc.attr("vpcId")),
    )?;

    let file_system = stack.declare(
        ResourceKind::FileSystem,
        "EfsFileSystem",
        Properties::new()
            .with("network", vpc.attr("vpcId"))
            .with("encrypted", true),
    )?;

    let service_certificate = stack.declare(
        ResourceKind::Certificate,
        "ServiceCertificate",
        Properties::new()
            .with("domainName", lb_domain.as_str())
            .with("validationMethod", "DNS")
            .with("hostedZoneId", settings.zone_id.as_str()),
    )?;

    let service = declare_service(
        &mut stack,
        &settings,
        &lb_domain,
        &vpc,
        &database,
        &file_system,
        &service_certificate,
    )?;

    stack.grant(&service, &database)?;
    stack.grant(&service, &file_system)?;

    stack.declare(
        ResourceKind::DnsRecord,
        "ServiceARecord",
        Properties::new()
            .with("hostedZoneId", settings.zone_id.as_str())
            .with("recordName", lb_domain.as_str())
            .with("recordType", "A")
            .with(
                "aliasTarget",
                Properties::new()
                    .with("dnsName", service.attr("loadBalancerDnsName"))
                    .with("hostedZoneId", service.attr("loadBalancerHostedZoneId")),
            ),
    )?;

    let web_acl = declare_web_acl(&mut stack, &settings)?;

    let cdn_certificate = stack.declare(
        ResourceKind::Certificate,
        "custom-certificate",
        Properties::new()
            .with("domainName", settings.custom_domain.as_str())
            .with("validationMethod", "DNS")
            .with("hostedZoneId", settings.zone_id.as_str()),
    )?;

    let distribution = stack.declare(
        ResourceKind::ContentDelivery,
        "CloudfrontDistribution",
        Properties::new()
            .with("originDomainName", lb_domain.as_str())
            .with("originProtocolPolicy", "match-viewer")
            .with("allowedMethods", "ALL")
            .with("cachePolicy", "CachingDisabled")
            .with("originRequestPolicy", "AllViewer")
            .with("domainNames", vec![settings.custom_domain.as_str()])
            .with("certificate", cdn_certificate.attr("arn"))
            .with("webAcl", web_acl.attr("arn")),
    )?;

    for (name, record_type) in [("Route53ARecord", "A"), ("Route53AaaaRecord", "AAAA")] {
        stack.declare(
            ResourceKind::DnsRecord,
            name,
            Properties::new()
                .with("hostedZoneId", settings.zone_id.as_str())
                .with("recordName", settings.custom_domain.as_str())
                .with("recordType", record_type)
                .with(
                    "aliasTarget",
                    Properties::new()
                        .with("dnsName", distribution.attr("domainName"))
                        .with("hostedZoneId", CLOUDFRONT_HOSTED_ZONE_ID),
                ),
        )?;
    }

    stack.output(
        "CdnEndpoint",
        format!("https://{}/", settings.custom_domain),
        Some("CloudFront URL endpoint"),
    )?;

    Ok(stack)
}

fn declare_service(
    stack: &mut Stack,
    settings: &DeploymentSettings,
    lb_domain: &str,
    vpc: &ResourceDescriptor,
    database: &ResourceDescriptor,
    file_system: &ResourceDescriptor,
    certificate: &ResourceDescriptor,
) -> Result<ResourceDescriptor> {
    let mut secrets = Properties::new();
    for (env, field) in DATABASE_SECRETS {
        secrets.insert(
            env,
            Properties::new()
                .with("secret", database.attr("credentialsSecretRef"))
                .with("field", field),
        );
    }

    let volume = Properties::new()
        .with("name", STAGING_VOLUME)
        .with("fileSystemId", file_system.attr("fileSystemId"));
    let mount_point = Properties::new()
        .with("containerPath", "/staging")
        .with("sourceVolume", STAGING_VOLUME)
        .with("readOnly", false);

    stack.declare(
        ResourceKind::ComputeService,
        "Service",
        Properties::new()
            .with("network", vpc.attr("vpcId"))
            .with("launchType", "FARGATE")
            .with("cpu", 512)
            .with("memoryLimitMiB", 1024)
            .with("desiredCount", 2)
            .with(
                "image",
                Properties::new()
                    .with("source", "asset")
                    .with("location", "docker"),
            )
            .with("containerName", CONTAINER_NAME)
            .with("containerPort", CONTAINER_PORT)
            .with("protocol", "HTTPS")
            .with("redirectHttp", true)
            .with("domainName", lb_domain)
            .with("domainZoneId", settings.zone_id.as_str())
            .with("certificate", certificate.attr("arn"))
            .with("secrets", secrets)
            .with("volumes", vec![volume])
            .with("mountPoints", vec![mount_point]),
    )
}

fn visibility(metric_name: String) -> Properties {
    Properties::new()
        .with("cloudWatchMetricsEnabled", true)
        .with("metricName", metric_name)
        .with("sampledRequestsEnabled", true)
}

fn declare_web_acl(stack: &mut Stack, settings: &DeploymentSettings) -> Result<ResourceDescriptor> {
    let metric = format!("{}-waf-acl", stack.name());
    let addresses: Vec<PropertyValue> = settings
        .ip_allow_list
        .iter()
        .flatten()
        .map(|address| PropertyValue::from(address.as_str()))
        .collect();

    let ip_set = stack.declare(
        ResourceKind::AccessPolicy,
        "cloudFrontWafAclIpSet",
        Properties::new()
            .with("policyType", "ipSet")
            .with("scope", "CLOUDFRONT")
            .with("ipAddressVersion", "IPV4")
            .with("addresses", PropertyValue::List(addresses)),
    )?;

    let default_action = if settings.restricts_by_ip() {
        "block"
    } else {
        "allow"
    };

    let rate_limit = Properties::new()
        .with("name", "rate-limit")
        .with("priority", 0)
        .with("action", "block")
        .with(
            "statement",
            Properties::new().with(
                "rateBasedStatement",
                Properties::new()
                    .with("aggregateKeyType", "IP")
                    .with("limit", RATE_LIMIT),
            ),
        )
        .with("visibilityConfig", visibility(format!("{}-rate-limit", metric)));

    let ip_whitelist = Properties::new()
        .with("name", "ip-whitelist")
        .with("priority", 1)
        .with("action", "allow")
        .with(
            "statement",
            Properties::new().with(
                "IPSetReferenceStatement",
                Properties::new().with("arn", ip_set.attr("arn")),
            ),
        )
        .with("visibilityConfig", visibility(format!("{}-ip-whitelist", metric)));

    stack.declare(
        ResourceKind::AccessPolicy,
        "cloudFrontWafAcl",
        Properties::new()
            .with("policyType", "webAcl")
            .with("scope", "CLOUDFRONT")
            .with("defaultAction", default_action)
            .with("visibilityConfig", visibility(metric))
            .with("rules", vec![rate_limit, ip_whitelist]),
    )
}
