//! Rollout triggers: configuration sources whose content hash is stamped on
//! a pod template so that a content change rolls the pods.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::core::DynamicObject;
use tracing::{debug, instrument, trace};

use crate::client::{ClusterClient, ObjectKey};
use crate::controller::ReconcileErr;
use crate::hash::hash;
use crate::resources::Producer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Secret,
    ConfigMap,
}

impl SourceKind {
    fn annotation_suffix(&self) -> &'static str {
        match self {
            SourceKind::Secret => "secret-hash",
            SourceKind::ConfigMap => "configmap-hash",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Secret => write!(f, "Secret"),
            SourceKind::ConfigMap => write!(f, "ConfigMap"),
        }
    }
}

/// Reference to a configuration source a workload reads from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerRef {
    pub kind: SourceKind,
    pub key: ObjectKey,
}

impl TriggerRef {
    pub fn secret(namespace: &str, name: &str) -> Self {
        Self {
            kind: SourceKind::Secret,
            key: ObjectKey::new(namespace, name),
        }
    }

    pub fn config_map(namespace: &str, name: &str) -> Self {
        Self {
            kind: SourceKind::ConfigMap,
            key: ObjectKey::new(namespace, name),
        }
    }

    /// The Secret materialised from a SecretDefinition shares its name and
    /// namespace.
    pub fn from_secret_definition(
        definition: &Producer<DynamicObject>,
        default_namespace: &str,
    ) -> Result<Self, ReconcileErr> {
        let def = definition();
        let key = ObjectKey::from_meta(&def.metadata, default_namespace)?;
        Ok(Self {
            kind: SourceKind::Secret,
            key,
        })
    }
}

/// Live snapshot of a configuration source; `None` when it does not exist.
#[derive(Clone, Debug, PartialEq)]
pub enum TriggerSource {
    Secret(Option<Secret>),
    ConfigMap(Option<ConfigMap>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RolloutTrigger {
    name: String,
    source: TriggerSource,
}

impl RolloutTrigger {
    pub fn from_secret(name: impl Into<String>, secret: Secret) -> Self {
        Self {
            name: name.into(),
            source: TriggerSource::Secret(Some(secret)),
        }
    }

    pub fn from_config_map(name: impl Into<String>, cm: ConfigMap) -> Self {
        Self {
            name: name.into(),
            source: TriggerSource::ConfigMap(Some(cm)),
        }
    }

    /// Trigger for a source that does not exist (yet).
    pub fn absent(name: impl Into<String>, kind: SourceKind) -> Self {
        let source = match kind {
            SourceKind::Secret => TriggerSource::Secret(None),
            SourceKind::ConfigMap => TriggerSource::ConfigMap(None),
        };
        Self {
            name: name.into(),
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SourceKind {
        match self.source {
            TriggerSource::Secret(_) => SourceKind::Secret,
            TriggerSource::ConfigMap(_) => SourceKind::ConfigMap,
        }
    }

    pub fn source(&self) -> &TriggerSource {
        &self.source
    }

    /// Flattened key -> bytes content; `None` when the source is absent.
    pub fn content(&self) -> Option<BTreeMap<String, Vec<u8>>> {
        match &self.source {
            TriggerSource::Secret(secret) => secret.as_ref().map(|s| {
                let mut out: BTreeMap<String, Vec<u8>> = s
                    .string_data
                    .iter()
                    .flatten()
                    .map(|(k, v)| (k.clone(), v.clone().into_bytes()))
                    .collect();
                // stringData is write-only on the server; data wins on clash.
                for (k, v) in s.data.iter().flatten() {
                    out.insert(k.clone(), v.0.clone());
                }
                out
            }),
            TriggerSource::ConfigMap(cm) => cm.as_ref().map(|c| {
                let mut out: BTreeMap<String, Vec<u8>> = c
                    .data
                    .iter()
                    .flatten()
                    .map(|(k, v)| (k.clone(), v.clone().into_bytes()))
                    .collect();
                for (k, v) in c.binary_data.iter().flatten() {
                    out.insert(k.clone(), v.0.clone());
                }
                out
            }),
        }
    }

    /// Content fingerprint; empty when the source is absent or has no data.
    pub fn hash(&self) -> String {
        match self.content() {
            Some(content) if !content.is_empty() => hash(content),
            _ => String::new(),
        }
    }

    /// `<domain>/<name>.secret-hash` or `<domain>/<name>.configmap-hash`.
    pub fn annotation_key(&self, domain: &str) -> String {
        format!(
            "{}/{}.{}",
            domain,
            self.name,
            self.kind().annotation_suffix()
        )
    }
}

/// Fetch the live state of every referenced source. A missing source yields
/// an absent trigger; any other failure aborts the whole resolution.
#[instrument(level = "debug", skip_all, fields(count = refs.len()))]
pub async fn resolve_triggers(
    client: &dyn ClusterClient,
    refs: &[TriggerRef],
) -> Result<Vec<RolloutTrigger>, ReconcileErr> {
    let mut triggers = Vec::with_capacity(refs.len());
    for r in refs {
        let name = r.key.name.clone();
        let trigger = match r.kind {
            SourceKind::Secret => match client.get_secret(&r.key).await? {
                Some(s) => RolloutTrigger::from_secret(name, s),
                None => {
                    debug!(key = %r.key, kind = %r.kind, "trigger source not found");
                    RolloutTrigger::absent(name, SourceKind::Secret)
                }
            },
            SourceKind::ConfigMap => {
                match client.get_config_map(&r.key).await? {
                    Some(cm) => RolloutTrigger::from_config_map(name, cm),
                    None => {
                        debug!(key = %r.key, kind = %r.kind, "trigger source not found");
                        RolloutTrigger::absent(name, SourceKind::ConfigMap)
                    }
                }
            }
        };
        trace!(key = %r.key, hash = %trigger.hash(), "trigger resolved");
        triggers.push(trigger);
    }
    Ok(triggers)
}

/// Secret-kind triggers for the Secrets materialised by SecretDefinitions.
pub async fn triggers_from_secret_defs(
    client: &dyn ClusterClient,
    definitions: &[Producer<DynamicObject>],
    default_namespace: &str,
) -> Result<Vec<RolloutTrigger>, ReconcileErr> {
    let refs = definitions
        .iter()
        .map(|d| TriggerRef::from_secret_definition(d, default_namespace))
        .collect::<Result<Vec<_>, _>>()?;
    resolve_triggers(client, &refs).await
}
