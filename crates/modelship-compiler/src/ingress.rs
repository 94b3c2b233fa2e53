//! Ingress compilation and canary traffic annotations
//!
//! Canary routing follows the ingress-nginx canary annotations. Each rule
//! writes its annotation keys in list order, so when two rules target the
//! same key the later rule wins.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use modelship_common::naming;
use modelship_common::types::{CanaryRule, TargetType};
use modelship_common::{Error, Result};

use crate::compiler::TargetContext;
use crate::workload::PORT_NAME;

/// Prefix shared by all canary annotations
pub const CANARY_ANNOTATION_PREFIX: &str = "nginx.ingress.kubernetes.io/canary";

const ANNOTATION_CANARY: &str = "nginx.ingress.kubernetes.io/canary";
const ANNOTATION_WEIGHT: &str = "nginx.ingress.kubernetes.io/canary-weight";
const ANNOTATION_HEADER: &str = "nginx.ingress.kubernetes.io/canary-by-header";
const ANNOTATION_HEADER_VALUE: &str = "nginx.ingress.kubernetes.io/canary-by-header-value";
const ANNOTATION_COOKIE: &str = "nginx.ingress.kubernetes.io/canary-by-cookie";

/// Translate ordered canary rules into ingress annotations.
///
/// Returns an empty map when there are no rules.
pub fn canary_annotations(rules: &[CanaryRule]) -> Result<BTreeMap<String, String>> {
    let mut annotations = BTreeMap::new();
    if rules.is_empty() {
        return Ok(annotations);
    }

    annotations.insert(ANNOTATION_CANARY.to_string(), "true".to_string());
    for rule in rules {
        match rule {
            CanaryRule::Weight { weight } => {
                if *weight > 100 {
                    return Err(Error::validation_for(
                        "canary weight",
                        format!("weight {} exceeds 100", weight),
                    ));
                }
                annotations.insert(ANNOTATION_WEIGHT.to_string(), weight.to_string());
            }
            CanaryRule::Header {
                header,
                header_value,
            } => {
                annotations.insert(ANNOTATION_HEADER.to_string(), header.clone());
                if let Some(value) = header_value {
                    annotations.insert(ANNOTATION_HEADER_VALUE.to_string(), value.clone());
                }
            }
            CanaryRule::Cookie { cookie } => {
                annotations.insert(ANNOTATION_COOKIE.to_string(), cookie.clone());
            }
        }
    }
    Ok(annotations)
}

pub(crate) fn compile(ctx: &TargetContext<'_>, service_name: &str) -> Result<Ingress> {
    let mut metadata = ctx.object_meta();

    if ctx.target.type_ == TargetType::Canary {
        let canary = canary_annotations(&ctx.target.canary_rules)?;
        metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(canary);
    }

    let host = naming::ingress_host(ctx.deployment, &ctx.cluster.ingress_address);
    let ingress_class_name = ctx
        .cluster
        .ingress_class
        .clone()
        .or_else(|| ctx.config.default_ingress_class.clone());

    Ok(Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name,
            rules: Some(vec![IngressRule {
                host: Some(host),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service_name.to_string(),
                                port: Some(ServiceBackendPort {
                                    name: Some(PORT_NAME.to_string()),
                                    number: None,
                                }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        status: None,
    })
}
