//! Exclusion-aware enforcement of a locked batch through server-side apply.

use std::collections::BTreeSet;

use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::core::DynamicObject;
use kube::{Client, ResourceExt};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info, instrument, trace, warn};

use crate::client::{ObjectKey, Owner};
use crate::config::ReconcilerConfig;
use crate::controller::ReconcileErr;
use crate::controller::exclude::{ExclusionSet, FieldPath, Segment};
use crate::resources::{LockedResource, ResourceKind};

/// Make `desired` safe to apply over `live`: every excluded path that the
/// desired manifest sets takes the live value, or is dropped when the live
/// object has none. Paths the desired manifest does not set stay unset, so
/// the applier never claims them.
pub fn lock_excluded_fields(
    desired: &mut JsonValue,
    live: &JsonValue,
    excluded: &ExclusionSet,
) {
    let mut removals: Vec<&FieldPath> = Vec::new();
    for path in excluded.iter() {
        let pointer = path.to_string();
        if desired.pointer(&pointer).is_none() {
            continue;
        }
        match live.pointer(&pointer) {
            Some(v) => {
                if let Some(slot) = desired.pointer_mut(&pointer) {
                    *slot = v.clone();
                }
            }
            None => removals.push(path),
        }
    }
    // Highest index first so earlier removals never shift later targets.
    removals.sort_unstable_by(|a, b| b.cmp(a));
    for path in removals {
        remove_at(desired, path);
    }
}

fn remove_at(value: &mut JsonValue, path: &FieldPath) {
    let Some((last, parent)) = path.segments().split_last() else {
        return;
    };
    let parent_ptr = FieldPath::from_segments(parent.to_vec()).to_string();
    let Some(container) = value.pointer_mut(&parent_ptr) else {
        return;
    };
    match (container, last) {
        (JsonValue::Object(map), Segment::Key(k)) => {
            map.remove(k);
        }
        (JsonValue::Object(map), Segment::Index(i)) => {
            map.remove(&i.to_string());
        }
        (JsonValue::Array(items), Segment::Index(i)) if *i < items.len() => {
            items.remove(*i);
        }
        _ => {}
    }
}

/// Attach the controller owner reference and the owner label.
fn stamp_owner(
    manifest: &mut JsonValue,
    owner: &Owner,
    label_key: &str,
) -> Result<(), ReconcileErr> {
    let reference = serde_json::to_value(&owner.reference)?;
    let meta = manifest
        .as_object_mut()
        .map(|obj| obj.entry("metadata").or_insert_with(|| json!({})))
        .and_then(JsonValue::as_object_mut)
        .ok_or_else(|| {
            ReconcileErr::InvalidObject("manifest has no metadata".into())
        })?;
    meta.insert("ownerReferences".into(), JsonValue::Array(vec![reference]));
    let labels = meta.entry("labels").or_insert_with(|| json!({}));
    if let Some(labels) = labels.as_object_mut() {
        labels.insert(label_key.into(), json!(owner.uid()));
    }
    Ok(())
}

fn dynamic_api(
    client: &Client,
    kind: ResourceKind,
    namespace: &str,
) -> Api<DynamicObject> {
    Api::namespaced_with(client.clone(), namespace, &kind.api_resource())
}

#[instrument(skip_all, fields(ns = %owner.namespace, owner = %owner.name(), count = batch.len()))]
pub async fn enforce(
    client: &Client,
    cfg: &ReconcilerConfig,
    owner: &Owner,
    batch: Vec<LockedResource>,
) -> Result<(), ReconcileErr> {
    let label_key = cfg.owner_label_key();
    let pp = PatchParams::apply(&cfg.field_manager).force();
    let mut applied: BTreeSet<(ResourceKind, ObjectKey)> = BTreeSet::new();

    for locked in batch {
        let kind = locked.object.kind();
        let key =
            ObjectKey::from_meta(locked.object.metadata(), &owner.namespace)?;
        let mut manifest = locked.object.to_manifest()?;
        stamp_owner(&mut manifest, owner, &label_key)?;

        let api = dynamic_api(client, kind, &key.namespace);
        match api.get_opt(&key.name).await? {
            Some(live) => {
                let live = serde_json::to_value(&live)?;
                lock_excluded_fields(&mut manifest, &live, &locked.excluded);
                debug!(%kind, %key, excluded = locked.excluded.len(), "enforce: patching");
            }
            None => debug!(%kind, %key, "enforce: creating"),
        }
        api.patch(&key.name, &pp, &Patch::Apply(&manifest)).await?;
        applied.insert((kind, key));
    }

    if cfg.prune {
        prune(client, owner, &label_key, &applied).await?;
    }
    info!(applied = applied.len(), "enforce: batch applied");
    Ok(())
}

/// Kinds the cluster does not serve (404) or that RBAC hides from the
/// reconciler (403) cannot hold objects it created.
fn unlistable(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404 || ae.code == 403)
}

/// Delete objects labelled as owned by `owner` that are not in `keep`.
async fn prune(
    client: &Client,
    owner: &Owner,
    label_key: &str,
    keep: &BTreeSet<(ResourceKind, ObjectKey)>,
) -> Result<(), ReconcileErr> {
    let lp = ListParams::default()
        .labels(&format!("{}={}", label_key, owner.uid()));
    for kind in ResourceKind::ALL {
        let api = dynamic_api(client, kind, &owner.namespace);
        let list = match api.list(&lp).await {
            Ok(list) => list,
            Err(e) if unlistable(&e) => {
                warn!(%kind, error = %e, "prune: kind not listable; skipping");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        for obj in list {
            let owned = obj
                .owner_references()
                .iter()
                .any(|r| r.uid == owner.uid());
            let key = ObjectKey::new(
                obj.namespace().unwrap_or_else(|| owner.namespace.clone()),
                obj.name_any(),
            );
            if !owned || keep.contains(&(kind, key.clone())) {
                continue;
            }
            info!(%kind, %key, "prune: deleting object no longer desired");
            match api.delete(&key.name, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    trace!(%kind, %key, "prune: already gone");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}
