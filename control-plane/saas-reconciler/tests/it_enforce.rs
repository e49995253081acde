// Integration tests require a running Kubernetes cluster. These tests are ignored by default.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, PodSpec, PodTemplateSpec, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta,
};
use kube::{
    Client,
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
};
use saas_reconciler::resources::{
    ControlledResources, Descriptor, WorkloadDescriptor, producer,
};
use saas_reconciler::{KubeClusterClient, Owner, Reconciler, ReconcilerConfig};
use serde::de::DeserializeOwned;

const NS: &str = "default";

// DNS-1123 safe numeric suffix for unique names
const DIGITS: [char; 10] = ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

async fn cluster() -> Option<Client> {
    match Client::try_default().await {
        Ok(c) => Some(c),
        Err(e) => {
            eprintln!("SKIPPED: no Kubernetes context available: {}", e);
            None
        }
    }
}

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(NS.into()),
        ..Default::default()
    }
}

fn app_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), name.to_string())])
}

fn service(name: &str) -> Service {
    Service {
        metadata: meta(name),
        spec: Some(ServiceSpec {
            selector: Some(app_labels(name)),
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                port: 80,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn deployment(name: &str, replicas: i32) -> Deployment {
    Deployment {
        metadata: meta(name),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(app_labels(name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_labels(name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".into(),
                        image: Some("nginx:alpine".into()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Owners are plain ConfigMaps; deleting one garbage-collects its children.
async fn create_owner(client: &Client, name: &str) -> Owner {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), NS);
    let cm = ConfigMap {
        metadata: meta(name),
        ..Default::default()
    };
    let cm = api
        .create(&PostParams::default(), &cm)
        .await
        .expect("create owner");
    Owner::from_resource(&cm).expect("owner reference")
}

async fn delete_owner(client: &Client, owner: &Owner) {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), NS);
    let _ = api.delete(owner.name(), &DeleteParams::background()).await;
}

fn reconciler(client: &Client) -> (Reconciler, Arc<ReconcilerConfig>) {
    let cfg = Arc::new(ReconcilerConfig::default());
    let cluster = KubeClusterClient::new(client.clone(), cfg.clone());
    let r = Reconciler::new(Arc::new(cluster), cfg.clone()).expect("config");
    (r, cfg)
}

async fn wait_gone<K>(api: &Api<K>, name: &str) -> bool
where
    K: Clone + DeserializeOwned + Debug,
{
    for _ in 0..30 {
        if api.get_opt(name).await.unwrap_or(None).is_none() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    false
}

async fn live_replicas(api: &Api<Deployment>, name: &str) -> Option<i32> {
    api.get_opt(name)
        .await
        .expect("get deployment")
        .and_then(|d| d.spec)
        .and_then(|s| s.replicas)
}

#[tokio::test]
#[ignore]
async fn disabled_service_is_pruned_and_foreign_objects_survive() {
    saas_reconciler::init_tracing("saas_reconciler=debug");
    let Some(client) = cluster().await else {
        return;
    };
    let name = uniq("saas-it-prune");
    let owner = create_owner(&client, &name).await;
    let other = create_owner(&client, &format!("{name}-other")).await;
    let (r, cfg) = reconciler(&client);

    let kept = format!("{name}-kept");
    let dropped = format!("{name}-dropped");
    let resources = |dropped_enabled: bool| {
        let (k, d) = (kept.clone(), dropped.clone());
        ControlledResources {
            services: vec![
                Descriptor::new(producer(move || service(&k)), true),
                Descriptor::new(producer(move || service(&d)), dropped_enabled),
            ],
            ..Default::default()
        }
    };

    r.reconcile_owned_resources(&owner, resources(true))
        .await
        .expect("first cycle");
    let svc_api: Api<Service> = Api::namespaced(client.clone(), NS);
    for n in [&kept, &dropped] {
        let svc = svc_api.get_opt(n).await.unwrap().expect("service applied");
        let labels = svc.metadata.labels.unwrap_or_default();
        assert_eq!(labels.get(&cfg.owner_label_key()), Some(&owner.uid().to_string()));
    }

    // Carries our owner label but is controlled by somebody else.
    let foreign_name = format!("{name}-foreign");
    let mut foreign = service(&foreign_name);
    foreign.metadata.labels = Some(BTreeMap::from([(
        cfg.owner_label_key(),
        owner.uid().to_string(),
    )]));
    foreign.metadata.owner_references = Some(vec![other.reference.clone()]);
    svc_api
        .create(&PostParams::default(), &foreign)
        .await
        .expect("create foreign service");

    r.reconcile_owned_resources(&owner, resources(false))
        .await
        .expect("second cycle");

    assert!(wait_gone(&svc_api, &dropped).await, "disabled service pruned");
    assert!(svc_api.get_opt(&kept).await.unwrap().is_some());
    assert!(svc_api.get_opt(&foreign_name).await.unwrap().is_some());

    delete_owner(&client, &owner).await;
    delete_owner(&client, &other).await;
}

#[tokio::test]
#[ignore]
async fn live_replicas_are_kept_while_autoscaled() {
    saas_reconciler::init_tracing("saas_reconciler=debug");
    let Some(client) = cluster().await else {
        return;
    };
    let name = uniq("saas-it-hpa");
    let owner = create_owner(&client, &name).await;
    let (r, _) = reconciler(&client);

    let resources = |autoscaled: bool| {
        let n = name.clone();
        ControlledResources {
            deployments: vec![
                WorkloadDescriptor::new(producer(move || deployment(&n, 1)))
                    .with_hpa(autoscaled),
            ],
            ..Default::default()
        }
    };

    r.reconcile_owned_resources(&owner, resources(true))
        .await
        .expect("create deployment");
    let dep_api: Api<Deployment> = Api::namespaced(client.clone(), NS);
    assert_eq!(live_replicas(&dep_api, &name).await, Some(1));

    // Stand-in for an autoscaler decision.
    let scale = serde_json::json!({ "spec": { "replicas": 3 } });
    dep_api
        .patch(&name, &PatchParams::default(), &Patch::Merge(&scale))
        .await
        .expect("scale deployment");

    r.reconcile_owned_resources(&owner, resources(true))
        .await
        .expect("autoscaled cycle");
    assert_eq!(live_replicas(&dep_api, &name).await, Some(3));

    // Without an autoscaler the template count is enforced again.
    r.reconcile_owned_resources(&owner, resources(false))
        .await
        .expect("fixed-scale cycle");
    assert_eq!(live_replicas(&dep_api, &name).await, Some(1));

    delete_owner(&client, &owner).await;
    assert!(wait_gone(&dep_api, &name).await, "deployment collected");
}
