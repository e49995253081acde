use std::sync::Arc;

use tracing::{debug, info, instrument, trace};

use crate::client::{ClusterClient, Owner};
use crate::config::ReconcilerConfig;
use crate::controller::ReconcileErr;
use crate::controller::exclude::{ExclusionContext, ExclusionPolicy};
use crate::controller::mutate::with_rollout_triggers;
use crate::controller::replicas::{ScalableWorkload, resolve_replicas};
use crate::controller::trigger::resolve_triggers;
use crate::resources::{
    ControlledResources, Descriptor, LockedResource, ResourceObject,
    WorkloadDescriptor,
};

/// Turns the resources an owner controls into one exclusion-aware batch and
/// hands it to the cluster. Holds no per-cycle state, so one instance can
/// serve concurrent reconciles of different owners.
#[derive(Clone)]
pub struct Reconciler {
    client: Arc<dyn ClusterClient>,
    cfg: Arc<ReconcilerConfig>,
    policy: ExclusionPolicy,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        cfg: Arc<ReconcilerConfig>,
    ) -> Result<Self, ReconcileErr> {
        cfg.validate()?;
        let policy = ExclusionPolicy::from_config(&cfg)?;
        Ok(Self {
            client,
            cfg,
            policy,
        })
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.cfg
    }

    /// Assemble the locked batch for `resources` without enforcing it.
    /// Any failure to read live state aborts the whole batch.
    #[instrument(skip_all, fields(ns = %owner.namespace, owner = %owner.name()))]
    pub async fn locked_resources(
        &self,
        owner: &Owner,
        resources: ControlledResources,
    ) -> Result<Vec<LockedResource>, ReconcileErr> {
        let ControlledResources {
            deployments,
            stateful_sets,
            secret_definitions,
            services,
            pod_disruption_budgets,
            horizontal_pod_autoscalers,
            pod_monitors,
            grafana_dashboards,
        } = resources;

        let mut batch = Vec::new();
        for d in deployments {
            batch.extend(self.lock_workload(owner, d).await?);
        }
        for s in stateful_sets {
            batch.extend(self.lock_workload(owner, s).await?);
        }
        batch.extend(self.lock_all(secret_definitions, ResourceObject::SecretDefinition));
        batch.extend(self.lock_all(services, ResourceObject::Service));
        batch.extend(self.lock_all(pod_monitors, ResourceObject::PodMonitor));
        batch.extend(self.lock_all(
            horizontal_pod_autoscalers,
            ResourceObject::HorizontalPodAutoscaler,
        ));
        batch.extend(self.lock_all(
            pod_disruption_budgets,
            ResourceObject::PodDisruptionBudget,
        ));
        batch.extend(
            self.lock_all(grafana_dashboards, ResourceObject::GrafanaDashboard),
        );
        Ok(batch)
    }

    /// Compute and enforce everything `owner` controls in one batch.
    /// Errors are returned as-is; the caller owns backoff and requeue.
    #[instrument(skip_all, fields(ns = %owner.namespace, owner = %owner.name()))]
    pub async fn reconcile_owned_resources(
        &self,
        owner: &Owner,
        resources: ControlledResources,
    ) -> Result<(), ReconcileErr> {
        let batch = self.locked_resources(owner, resources).await?;
        let total = batch.len();
        self.client.enforce(owner, batch).await?;
        info!(total, "reconcile: owned resources enforced");
        Ok(())
    }

    async fn lock_workload<W: ScalableWorkload>(
        &self,
        owner: &Owner,
        workload: WorkloadDescriptor<W>,
    ) -> Result<Option<LockedResource>, ReconcileErr> {
        if !workload.enabled {
            trace!(kind = %W::KIND, "reconcile: workload disabled");
            return Ok(None);
        }
        let client = self.client.as_ref();
        let replicas = resolve_replicas(
            client,
            &workload.template,
            workload.has_hpa,
            &owner.namespace,
        )
        .await?;
        let triggers =
            resolve_triggers(client, &workload.rollout_triggers).await?;
        let template = with_rollout_triggers(
            workload.template,
            &triggers,
            replicas,
            &self.cfg.annotations_domain,
        );
        let object = template().into_object();
        let excluded = self.policy.compute(
            &object,
            ExclusionContext {
                autoscaled: workload.has_hpa,
            },
        );
        debug!(
            kind = %W::KIND,
            name = object.name().unwrap_or_default(),
            ?replicas,
            triggers = triggers.len(),
            "reconcile: workload locked"
        );
        Ok(Some(LockedResource { object, excluded }))
    }

    fn lock_all<T>(
        &self,
        descriptors: Vec<Descriptor<T>>,
        wrap: fn(T) -> ResourceObject,
    ) -> Vec<LockedResource> {
        descriptors
            .into_iter()
            .filter(|d| d.enabled)
            .map(|d| {
                let object = wrap((d.template)());
                let excluded =
                    self.policy.compute(&object, ExclusionContext::default());
                LockedResource { object, excluded }
            })
            .collect()
    }
}
