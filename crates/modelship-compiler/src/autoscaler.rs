//! Autoscaler (autoscaling/v2 HorizontalPodAutoscaler) compilation

use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
    MetricIdentifier, MetricSpec, MetricTarget, PodsMetricSource, ResourceMetricSource,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use modelship_common::types::HpaConf;
use modelship_common::{Error, Result};

use crate::compiler::{int32, TargetContext};
use crate::quantity::parse_quantity;

/// Custom pods metric exported by the serving container
pub const QPS_METRIC_NAME: &str = "http_request_per_second";

/// CPU utilization used when no threshold is configured
const DEFAULT_CPU_UTILIZATION: i32 = 80;

pub(crate) fn compile(
    ctx: &TargetContext<'_>,
    workload_name: &str,
) -> Result<Option<HorizontalPodAutoscaler>> {
    let Some(hpa) = &ctx.target.config.hpa_conf else {
        return Ok(None);
    };

    let min_replicas = hpa.min_replicas.unwrap_or(ctx.config.default_min_replicas);
    let max_replicas = hpa.max_replicas.unwrap_or(ctx.config.default_max_replicas);
    if min_replicas == 0 || min_replicas > max_replicas {
        return Err(Error::validation_for(
            &ctx.name,
            format!(
                "autoscaler replicas must satisfy 1 <= min ({}) <= max ({})",
                min_replicas, max_replicas
            ),
        ));
    }

    Ok(Some(HorizontalPodAutoscaler {
        metadata: ctx.object_meta(),
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: workload_name.to_string(),
            },
            min_replicas: Some(ctx.int32("minReplicas", min_replicas)?),
            max_replicas: ctx.int32("maxReplicas", max_replicas)?,
            metrics: Some(metrics(&ctx.name, hpa)?),
            behavior: None,
        }),
        status: None,
    }))
}

/// Metrics are additive; only when no threshold is set at all does the
/// default CPU utilization apply.
fn metrics(subject: &str, hpa: &HpaConf) -> Result<Vec<MetricSpec>> {
    let mut metrics = Vec::new();

    if let Some(qps) = hpa.qps {
        metrics.push(MetricSpec {
            type_: "Pods".to_string(),
            pods: Some(PodsMetricSource {
                metric: MetricIdentifier {
                    name: QPS_METRIC_NAME.to_string(),
                    selector: None,
                },
                target: MetricTarget {
                    type_: "AverageValue".to_string(),
                    average_value: Some(Quantity(qps.to_string())),
                    ..Default::default()
                },
            }),
            ..Default::default()
        });
    }

    if let Some(cpu) = hpa.cpu {
        metrics.push(cpu_metric(int32(subject, "cpu", cpu)?));
    }

    if let Some(memory) = &hpa.memory {
        metrics.push(MetricSpec {
            type_: "Resource".to_string(),
            resource: Some(ResourceMetricSource {
                name: "memory".to_string(),
                target: MetricTarget {
                    type_: "AverageValue".to_string(),
                    average_value: Some(parse_quantity(memory)?),
                    ..Default::default()
                },
            }),
            ..Default::default()
        });
    }

    if metrics.is_empty() {
        metrics.push(cpu_metric(DEFAULT_CPU_UTILIZATION));
    }

    Ok(metrics)
}

fn cpu_metric(utilization: i32) -> MetricSpec {
    MetricSpec {
        type_: "Resource".to_string(),
        resource: Some(ResourceMetricSource {
            name: "cpu".to_string(),
            target: MetricTarget {
                type_: "Utilization".to_string(),
                average_utilization: Some(utilization),
                ..Default::default()
            },
        }),
        ..Default::default()
    }
}
