//! In-memory cluster used by the integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, Secret, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    ObjectMeta, OwnerReference,
};
use kube::core::ErrorResponse;
use saas_reconciler::resources::{LockedResource, Producer, producer};
use saas_reconciler::{ClusterClient, ObjectKey, Owner, ReconcileErr};
use tokio::sync::RwLock;

pub const NS: &str = "saas";

#[derive(Default)]
pub struct FakeCluster {
    pub secrets: RwLock<HashMap<ObjectKey, Secret>>,
    pub config_maps: RwLock<HashMap<ObjectKey, ConfigMap>>,
    pub deployments: RwLock<HashMap<ObjectKey, Deployment>>,
    pub stateful_sets: RwLock<HashMap<ObjectKey, StatefulSet>>,
    pub batches: RwLock<Vec<Vec<LockedResource>>>,
    pub fail_reads_with: RwLock<Option<u16>>,
    pub fail_enforce_with: RwLock<Option<u16>>,
}

pub fn api_error(code: u16) -> ReconcileErr {
    ReconcileErr::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: format!("injected {code}"),
        reason: "Injected".into(),
        code,
    }))
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn put_secret(&self, name: &str, data: &[(&str, &str)]) {
        let secret = Secret {
            metadata: meta(name),
            data: Some(
                data.iter()
                    .map(|(k, v)| {
                        (k.to_string(), ByteString(v.as_bytes().to_vec()))
                    })
                    .collect(),
            ),
            ..Default::default()
        };
        self.secrets
            .write()
            .await
            .insert(ObjectKey::new(NS, name), secret);
    }

    pub async fn put_config_map(&self, name: &str, data: &[(&str, &str)]) {
        let cm = ConfigMap {
            metadata: meta(name),
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        };
        self.config_maps
            .write()
            .await
            .insert(ObjectKey::new(NS, name), cm);
    }

    pub async fn put_deployment(&self, name: &str, replicas: Option<i32>) {
        self.deployments
            .write()
            .await
            .insert(ObjectKey::new(NS, name), (deployment(name, replicas))());
    }

    pub async fn put_stateful_set(&self, name: &str, replicas: Option<i32>) {
        self.stateful_sets
            .write()
            .await
            .insert(ObjectKey::new(NS, name), (stateful_set(name, replicas))());
    }

    pub async fn last_batch(&self) -> Vec<LockedResource> {
        self.batches.read().await.last().cloned().unwrap_or_default()
    }

    async fn check_read(&self) -> Result<(), ReconcileErr> {
        match *self.fail_reads_with.read().await {
            Some(code) => Err(api_error(code)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_secret(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<Secret>, ReconcileErr> {
        self.check_read().await?;
        Ok(self.secrets.read().await.get(key).cloned())
    }

    async fn get_config_map(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<ConfigMap>, ReconcileErr> {
        self.check_read().await?;
        Ok(self.config_maps.read().await.get(key).cloned())
    }

    async fn get_deployment(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<Deployment>, ReconcileErr> {
        self.check_read().await?;
        Ok(self.deployments.read().await.get(key).cloned())
    }

    async fn get_stateful_set(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<StatefulSet>, ReconcileErr> {
        self.check_read().await?;
        Ok(self.stateful_sets.read().await.get(key).cloned())
    }

    async fn enforce(
        &self,
        _owner: &Owner,
        batch: Vec<LockedResource>,
    ) -> Result<(), ReconcileErr> {
        if let Some(code) = *self.fail_enforce_with.read().await {
            return Err(api_error(code));
        }
        self.batches.write().await.push(batch);
        Ok(())
    }
}

pub fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(NS.into()),
        ..Default::default()
    }
}

pub fn owner() -> Owner {
    Owner {
        reference: OwnerReference {
            api_version: "saas.3scale.net/v1alpha1".into(),
            kind: "Apicast".into(),
            name: "apicast".into(),
            uid: "3f1c2a8e".into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        },
        namespace: NS.into(),
    }
}

pub fn deployment(name: &str, replicas: Option<i32>) -> Producer<Deployment> {
    let name = name.to_string();
    producer(move || Deployment {
        metadata: meta(&name),
        spec: Some(DeploymentSpec {
            replicas,
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn stateful_set(name: &str, replicas: Option<i32>) -> Producer<StatefulSet> {
    let name = name.to_string();
    producer(move || StatefulSet {
        metadata: meta(&name),
        spec: Some(StatefulSetSpec {
            replicas,
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn service(name: &str, ports: usize) -> Producer<Service> {
    let name = name.to_string();
    producer(move || Service {
        metadata: meta(&name),
        spec: Some(ServiceSpec {
            ports: Some(
                (0..ports)
                    .map(|i| ServicePort {
                        name: Some(format!("p{i}")),
                        port: 8080 + i as i32,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Pod template annotations of a locked workload.
pub fn template_annotations(res: &LockedResource) -> BTreeMap<String, String> {
    use saas_reconciler::resources::ResourceObject;
    let template = match &res.object {
        ResourceObject::Deployment(d) => d.spec.as_ref().map(|s| &s.template),
        ResourceObject::StatefulSet(s) => s.spec.as_ref().map(|s| &s.template),
        _ => None,
    };
    template
        .and_then(|t| t.metadata.as_ref())
        .and_then(|m| m.annotations.clone())
        .unwrap_or_default()
}

pub fn replicas(res: &LockedResource) -> Option<i32> {
    use saas_reconciler::resources::ResourceObject;
    match &res.object {
        ResourceObject::Deployment(d) => d.spec.as_ref().and_then(|s| s.replicas),
        ResourceObject::StatefulSet(s) => {
            s.spec.as_ref().and_then(|s| s.replicas)
        }
        _ => None,
    }
}
