use std::collections::BTreeMap;

use futures_util::future::BoxFuture;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, instrument};

use crate::client::{ClusterClient, ObjectKey};
use crate::controller::ReconcileErr;
use crate::resources::{Producer, ResourceKind, ResourceObject};

/// A workload with a replica count and a pod template.
pub trait ScalableWorkload: Clone + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn metadata(&self) -> &ObjectMeta;
    fn replicas(&self) -> Option<i32>;
    fn set_replicas(&mut self, replicas: Option<i32>);
    /// Pod template annotations, created when missing.
    fn pod_template_annotations(&mut self) -> &mut BTreeMap<String, String>;
    fn into_object(self) -> ResourceObject;
    fn fetch_live<'a>(
        client: &'a dyn ClusterClient,
        key: &'a ObjectKey,
    ) -> BoxFuture<'a, Result<Option<Self>, ReconcileErr>>;
}

impl ScalableWorkload for Deployment {
    const KIND: ResourceKind = ResourceKind::Deployment;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn replicas(&self) -> Option<i32> {
        self.spec.as_ref().and_then(|s| s.replicas)
    }

    fn set_replicas(&mut self, replicas: Option<i32>) {
        self.spec.get_or_insert_with(Default::default).replicas = replicas;
    }

    fn pod_template_annotations(&mut self) -> &mut BTreeMap<String, String> {
        self.spec
            .get_or_insert_with(Default::default)
            .template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(BTreeMap::new)
    }

    fn into_object(self) -> ResourceObject {
        ResourceObject::Deployment(self)
    }

    fn fetch_live<'a>(
        client: &'a dyn ClusterClient,
        key: &'a ObjectKey,
    ) -> BoxFuture<'a, Result<Option<Self>, ReconcileErr>> {
        client.get_deployment(key)
    }
}

impl ScalableWorkload for StatefulSet {
    const KIND: ResourceKind = ResourceKind::StatefulSet;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn replicas(&self) -> Option<i32> {
        self.spec.as_ref().and_then(|s| s.replicas)
    }

    fn set_replicas(&mut self, replicas: Option<i32>) {
        self.spec.get_or_insert_with(Default::default).replicas = replicas;
    }

    fn pod_template_annotations(&mut self) -> &mut BTreeMap<String, String> {
        self.spec
            .get_or_insert_with(Default::default)
            .template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(BTreeMap::new)
    }

    fn into_object(self) -> ResourceObject {
        ResourceObject::StatefulSet(self)
    }

    fn fetch_live<'a>(
        client: &'a dyn ClusterClient,
        key: &'a ObjectKey,
    ) -> BoxFuture<'a, Result<Option<Self>, ReconcileErr>> {
        client.get_stateful_set(key)
    }
}

/// Replica count to apply. When an autoscaler governs the workload its last
/// decision (the live count) wins over the template; before the workload
/// exists the template value is used.
#[instrument(level = "debug", skip_all, fields(kind = %W::KIND, autoscaled = autoscaled))]
pub async fn resolve_replicas<W: ScalableWorkload>(
    client: &dyn ClusterClient,
    template: &Producer<W>,
    autoscaled: bool,
    default_namespace: &str,
) -> Result<Option<i32>, ReconcileErr> {
    let desired = template();
    if !autoscaled {
        return Ok(desired.replicas());
    }
    let key = ObjectKey::from_meta(desired.metadata(), default_namespace)?;
    match W::fetch_live(client, &key).await? {
        Some(live) => {
            debug!(
                %key,
                live = ?live.replicas(),
                desired = ?desired.replicas(),
                "using live replicas"
            );
            Ok(live.replicas())
        }
        None => {
            debug!(%key, "workload not found; using template replicas");
            Ok(desired.replicas())
        }
    }
}
