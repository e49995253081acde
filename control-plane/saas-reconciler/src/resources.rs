use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use serde_json::Value as JsonValue;

use crate::controller::ReconcileErr;
use crate::controller::exclude::ExclusionSet;
use crate::controller::trigger::TriggerRef;

/// A resource-producing function. Every call must build a fresh value from
/// the same upstream spec.
pub type Producer<T> = Arc<dyn Fn() -> T + Send + Sync>;

pub fn producer<T, F>(f: F) -> Producer<T>
where
    F: Fn() -> T + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The closed set of kinds an owner can control.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Deployment,
    StatefulSet,
    Service,
    HorizontalPodAutoscaler,
    PodDisruptionBudget,
    PodMonitor,
    GrafanaDashboard,
    SecretDefinition,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Deployment,
        ResourceKind::StatefulSet,
        ResourceKind::Service,
        ResourceKind::HorizontalPodAutoscaler,
        ResourceKind::PodDisruptionBudget,
        ResourceKind::PodMonitor,
        ResourceKind::GrafanaDashboard,
        ResourceKind::SecretDefinition,
    ];

    /// (group, version, kind, plural)
    fn coordinates(
        &self,
    ) -> (&'static str, &'static str, &'static str, &'static str) {
        match self {
            ResourceKind::Deployment => {
                ("apps", "v1", "Deployment", "deployments")
            }
            ResourceKind::StatefulSet => {
                ("apps", "v1", "StatefulSet", "statefulsets")
            }
            ResourceKind::Service => ("", "v1", "Service", "services"),
            ResourceKind::HorizontalPodAutoscaler => (
                "autoscaling",
                "v2",
                "HorizontalPodAutoscaler",
                "horizontalpodautoscalers",
            ),
            ResourceKind::PodDisruptionBudget => (
                "policy",
                "v1",
                "PodDisruptionBudget",
                "poddisruptionbudgets",
            ),
            ResourceKind::PodMonitor => {
                ("monitoring.coreos.com", "v1", "PodMonitor", "podmonitors")
            }
            ResourceKind::GrafanaDashboard => (
                "integreatly.org",
                "v1alpha1",
                "GrafanaDashboard",
                "grafanadashboards",
            ),
            ResourceKind::SecretDefinition => (
                "secrets-manager.tuenti.io",
                "v1alpha1",
                "SecretDefinition",
                "secretdefinitions",
            ),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.coordinates().2
    }

    pub fn api_version(&self) -> String {
        let (group, version, _, _) = self.coordinates();
        if group.is_empty() {
            version.to_string()
        } else {
            format!("{}/{}", group, version)
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version, kind, _) = self.coordinates();
        GroupVersionKind::gvk(group, version, kind)
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(&self.gvk(), self.coordinates().3)
    }

    /// Workloads whose replica count an autoscaler may own.
    pub fn is_scalable(&self) -> bool {
        matches!(self, ResourceKind::Deployment | ResourceKind::StatefulSet)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Discriminated result of invoking a producer.
#[derive(Clone, Debug)]
pub enum ResourceObject {
    Deployment(Deployment),
    StatefulSet(StatefulSet),
    Service(Service),
    HorizontalPodAutoscaler(HorizontalPodAutoscaler),
    PodDisruptionBudget(PodDisruptionBudget),
    PodMonitor(DynamicObject),
    GrafanaDashboard(DynamicObject),
    SecretDefinition(DynamicObject),
}

impl ResourceObject {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceObject::Deployment(_) => ResourceKind::Deployment,
            ResourceObject::StatefulSet(_) => ResourceKind::StatefulSet,
            ResourceObject::Service(_) => ResourceKind::Service,
            ResourceObject::HorizontalPodAutoscaler(_) => {
                ResourceKind::HorizontalPodAutoscaler
            }
            ResourceObject::PodDisruptionBudget(_) => {
                ResourceKind::PodDisruptionBudget
            }
            ResourceObject::PodMonitor(_) => ResourceKind::PodMonitor,
            ResourceObject::GrafanaDashboard(_) => {
                ResourceKind::GrafanaDashboard
            }
            ResourceObject::SecretDefinition(_) => {
                ResourceKind::SecretDefinition
            }
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ResourceObject::Deployment(o) => &o.metadata,
            ResourceObject::StatefulSet(o) => &o.metadata,
            ResourceObject::Service(o) => &o.metadata,
            ResourceObject::HorizontalPodAutoscaler(o) => &o.metadata,
            ResourceObject::PodDisruptionBudget(o) => &o.metadata,
            ResourceObject::PodMonitor(o)
            | ResourceObject::GrafanaDashboard(o)
            | ResourceObject::SecretDefinition(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata().name.as_deref()
    }

    /// Serialize to a manifest that always carries apiVersion and kind.
    /// A dynamic object typed as a different kind than its variant is
    /// rejected.
    pub fn to_manifest(&self) -> Result<JsonValue, ReconcileErr> {
        let mut value = match self {
            ResourceObject::Deployment(o) => serde_json::to_value(o)?,
            ResourceObject::StatefulSet(o) => serde_json::to_value(o)?,
            ResourceObject::Service(o) => serde_json::to_value(o)?,
            ResourceObject::HorizontalPodAutoscaler(o) => {
                serde_json::to_value(o)?
            }
            ResourceObject::PodDisruptionBudget(o) => serde_json::to_value(o)?,
            ResourceObject::PodMonitor(o)
            | ResourceObject::GrafanaDashboard(o)
            | ResourceObject::SecretDefinition(o) => serde_json::to_value(o)?,
        };
        let map = value.as_object_mut().ok_or_else(|| {
            ReconcileErr::InvalidObject(format!(
                "{} did not serialize to an object",
                self.kind()
            ))
        })?;
        let kind = self.kind();
        for (field, expected) in [
            ("apiVersion", kind.api_version()),
            ("kind", kind.kind().to_string()),
        ] {
            match map.get(field).cloned() {
                None | Some(JsonValue::Null) => {
                    map.insert(field.into(), JsonValue::String(expected));
                }
                Some(JsonValue::String(found)) if found == expected => {}
                Some(found) => {
                    return Err(ReconcileErr::InvalidObject(format!(
                        "{kind} object carries {field} {found}, want {expected}"
                    )));
                }
            }
        }
        Ok(value)
    }
}

/// A non-workload resource and whether it should exist this cycle.
#[derive(Clone)]
pub struct Descriptor<T> {
    pub template: Producer<T>,
    pub enabled: bool,
}

impl<T> Descriptor<T> {
    pub fn new(template: Producer<T>, enabled: bool) -> Self {
        Self { template, enabled }
    }
}

/// A scalable workload with the configuration sources whose changes must
/// roll its pods.
#[derive(Clone)]
pub struct WorkloadDescriptor<W> {
    pub template: Producer<W>,
    pub rollout_triggers: Vec<TriggerRef>,
    pub has_hpa: bool,
    pub enabled: bool,
}

impl<W> WorkloadDescriptor<W> {
    pub fn new(template: Producer<W>) -> Self {
        Self {
            template,
            rollout_triggers: vec![],
            has_hpa: false,
            enabled: true,
        }
    }

    pub fn with_triggers(mut self, triggers: Vec<TriggerRef>) -> Self {
        self.rollout_triggers = triggers;
        self
    }

    pub fn with_hpa(mut self, has_hpa: bool) -> Self {
        self.has_hpa = has_hpa;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Everything one owner controls, grouped by kind.
#[derive(Clone, Default)]
pub struct ControlledResources {
    pub deployments: Vec<WorkloadDescriptor<Deployment>>,
    pub stateful_sets: Vec<WorkloadDescriptor<StatefulSet>>,
    pub secret_definitions: Vec<Descriptor<DynamicObject>>,
    pub services: Vec<Descriptor<Service>>,
    pub pod_disruption_budgets: Vec<Descriptor<PodDisruptionBudget>>,
    pub horizontal_pod_autoscalers: Vec<Descriptor<HorizontalPodAutoscaler>>,
    pub pod_monitors: Vec<Descriptor<DynamicObject>>,
    pub grafana_dashboards: Vec<Descriptor<DynamicObject>>,
}

/// A concrete object plus the paths enforcement must leave untouched.
#[derive(Clone, Debug)]
pub struct LockedResource {
    pub object: ResourceObject,
    pub excluded: ExclusionSet,
}
