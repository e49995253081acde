pub mod enforcer;
pub mod exclude;
pub mod mutate;
pub mod reconcile;
pub mod replicas;
pub mod trigger;

pub use reconcile::Reconciler;

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("kube api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid object: {0}")]
    InvalidObject(String),
    #[error("invalid field path {0:?}")]
    InvalidPath(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconcileErr {
    /// True when the API server answered 404 for the requested object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileErr::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }
}

pub fn into_internal<E: std::fmt::Display>(e: E) -> ReconcileErr {
    ReconcileErr::Internal(e.to_string())
}
