use tracing::trace;

use crate::controller::replicas::ScalableWorkload;
use crate::controller::trigger::RolloutTrigger;
use crate::resources::Producer;

/// Wrap a workload producer so that every produced object carries one pod
/// template annotation per trigger and, when given, the resolved replica
/// count. The original producer is left untouched and every call returns an
/// independent value.
pub fn with_rollout_triggers<W: ScalableWorkload>(
    template: Producer<W>,
    triggers: &[RolloutTrigger],
    replicas: Option<i32>,
    domain: &str,
) -> Producer<W> {
    let annotations: Vec<(String, String)> = triggers
        .iter()
        .map(|t| (t.annotation_key(domain), t.hash()))
        .collect();
    std::sync::Arc::new(move || {
        let mut workload = template();
        if !annotations.is_empty() {
            let target = workload.pod_template_annotations();
            for (k, v) in &annotations {
                target.insert(k.clone(), v.clone());
            }
        }
        if let Some(r) = replicas {
            workload.set_replicas(Some(r));
        }
        trace!(kind = %W::KIND, annotations = annotations.len(), ?replicas, "decorated workload");
        workload
    })
}
