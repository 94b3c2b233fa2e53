//! Output of target compilation

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;

/// Desired state for one deployment target
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledTarget {
    /// Name shared by every object below
    pub name: String,
    /// Namespace every object below lives in
    pub namespace: String,
    /// Serving workload
    pub workload: Deployment,
    /// Autoscaler, present only when the target configures one
    pub autoscaler: Option<HorizontalPodAutoscaler>,
    /// Network service fronting the workload
    pub service: Service,
    /// Public ingress route
    pub ingress: Ingress,
}

impl CompiledTarget {
    /// Number of objects this target reconciles into
    pub fn resource_count(&self) -> usize {
        3 + usize::from(self.autoscaler.is_some())
    }
}
