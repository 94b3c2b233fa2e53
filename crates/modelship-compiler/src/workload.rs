//! Workload (apps/v1 Deployment) compilation

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use modelship_common::types::{ResourceItem, Resources};
use modelship_common::Result;

use crate::compiler::TargetContext;
use crate::quantity::parse_quantity;

/// Name of the serving container
pub(crate) const CONTAINER_NAME: &str = "serving";
/// Name of the serving port on the container and the Service
pub(crate) const PORT_NAME: &str = "http";
/// Rolling update surge/unavailability bound
const ROLLING_UPDATE_PERCENT: &str = "25%";

pub(crate) fn compile(ctx: &TargetContext<'_>) -> Result<Deployment> {
    let config = &ctx.target.config;

    let replicas = config
        .hpa_conf
        .as_ref()
        .and_then(|hpa| hpa.min_replicas)
        .unwrap_or(ctx.config.default_replicas);

    let mut env = vec![EnvVar {
        name: "PORT".to_string(),
        value: Some(ctx.config.container_port.to_string()),
        ..Default::default()
    }];
    env.extend(config.envs.iter().map(|e| EnvVar {
        name: e.name.clone(),
        value: Some(e.value.clone()),
        ..Default::default()
    }));

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(ctx.artifact.image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some(PORT_NAME.to_string()),
            container_port: i32::from(ctx.config.container_port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(env),
        resources: config.resources.as_ref().map(resource_requirements).transpose()?,
        readiness_probe: Some(http_probe("/readyz", 5)),
        liveness_probe: Some(http_probe("/livez", 30)),
        ..Default::default()
    };

    let pod_annotations = ctx.annotations.clone();

    Ok(Deployment {
        metadata: ctx.object_meta(),
        spec: Some(DeploymentSpec {
            replicas: Some(ctx.int32("replicas", replicas)?),
            selector: LabelSelector {
                match_labels: Some(ctx.selector.clone()),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_surge: Some(IntOrString::String(ROLLING_UPDATE_PERCENT.to_string())),
                    max_unavailable: Some(IntOrString::String(
                        ROLLING_UPDATE_PERCENT.to_string(),
                    )),
                }),
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(ctx.labels.clone()),
                    annotations: Some(pod_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

fn http_probe(path: &str, initial_delay_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::String(PORT_NAME.to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(10),
        ..Default::default()
    }
}

fn resource_requirements(resources: &Resources) -> Result<ResourceRequirements> {
    Ok(ResourceRequirements {
        requests: resources.requests.as_ref().map(quantities).transpose()?,
        limits: resources.limits.as_ref().map(quantities).transpose()?,
        ..Default::default()
    })
}

fn quantities(item: &ResourceItem) -> Result<BTreeMap<String, Quantity>> {
    let mut out = BTreeMap::new();
    if let Some(cpu) = &item.cpu {
        out.insert("cpu".to_string(), parse_quantity(cpu)?);
    }
    if let Some(memory) = &item.memory {
        out.insert("memory".to_string(), parse_quantity(memory)?);
    }
    for (name, value) in &item.custom {
        out.insert(name.clone(), parse_quantity(value)?);
    }
    Ok(out)
}
