use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    ObjectMeta, OwnerReference,
};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::trace;

#[cfg(test)]
use mockall::automock;

use crate::config::ReconcilerConfig;
use crate::controller::ReconcileErr;
use crate::controller::enforcer;
use crate::resources::LockedResource;

/// Namespaced name of a live object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a generated object; objects without a namespace land in the
    /// owner's namespace.
    pub fn from_meta(
        meta: &ObjectMeta,
        default_namespace: &str,
    ) -> Result<Self, ReconcileErr> {
        let name = meta.name.clone().ok_or_else(|| {
            ReconcileErr::InvalidObject("object has no metadata.name".into())
        })?;
        let namespace = meta
            .namespace
            .clone()
            .unwrap_or_else(|| default_namespace.to_string());
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The custom resource on whose behalf a batch is enforced.
#[derive(Clone, Debug, PartialEq)]
pub struct Owner {
    pub reference: OwnerReference,
    pub namespace: String,
}

impl Owner {
    pub fn from_resource<K>(obj: &K) -> Result<Self, ReconcileErr>
    where
        K: Resource<DynamicType = ()>,
    {
        let reference = obj.controller_owner_ref(&()).ok_or_else(|| {
            ReconcileErr::InvalidObject(
                "owner must have both a name and a uid".into(),
            )
        })?;
        let namespace = obj.namespace().ok_or_else(|| {
            ReconcileErr::InvalidObject("owner must be namespaced".into())
        })?;
        Ok(Self {
            reference,
            namespace,
        })
    }

    pub fn name(&self) -> &str {
        &self.reference.name
    }

    pub fn uid(&self) -> &str {
        &self.reference.uid
    }
}

/// Cluster capability consumed by the reconciler: point reads of live state
/// and one batch write that honours per-object exclusions.
///
/// Reads return `Ok(None)` when the object does not exist.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_secret(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<Secret>, ReconcileErr>;

    async fn get_config_map(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<ConfigMap>, ReconcileErr>;

    async fn get_deployment(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<Deployment>, ReconcileErr>;

    async fn get_stateful_set(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<StatefulSet>, ReconcileErr>;

    /// Create, patch or delete live objects so that they match `batch`,
    /// never overwriting an excluded path of an existing object.
    async fn enforce(
        &self,
        owner: &Owner,
        batch: Vec<LockedResource>,
    ) -> Result<(), ReconcileErr>;
}

/// [`ClusterClient`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    cfg: Arc<ReconcilerConfig>,
}

impl KubeClusterClient {
    pub fn new(client: Client, cfg: Arc<ReconcilerConfig>) -> Self {
        Self { client, cfg }
    }

    async fn get_opt<K>(&self, key: &ObjectKey) -> Result<Option<K>, ReconcileErr>
    where
        K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + fmt::Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        let found = api.get_opt(&key.name).await?;
        trace!(%key, kind = %K::kind(&()), found = found.is_some(), "get_opt");
        Ok(found)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_secret(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<Secret>, ReconcileErr> {
        self.get_opt(key).await
    }

    async fn get_config_map(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<ConfigMap>, ReconcileErr> {
        self.get_opt(key).await
    }

    async fn get_deployment(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<Deployment>, ReconcileErr> {
        self.get_opt(key).await
    }

    async fn get_stateful_set(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<StatefulSet>, ReconcileErr> {
        self.get_opt(key).await
    }

    async fn enforce(
        &self,
        owner: &Owner,
        batch: Vec<LockedResource>,
    ) -> Result<(), ReconcileErr> {
        enforcer::enforce(&self.client, &self.cfg, owner, batch).await
    }
}
