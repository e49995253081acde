use envconfig::Envconfig;

use crate::controller::ReconcileErr;
use crate::controller::exclude::FieldPath;

/// Default prefix for rollout-trigger annotations and ownership labels.
pub const DEFAULT_ANNOTATIONS_DOMAIN: &str = "saas.3scale.net";

#[derive(Envconfig, Clone, Debug)]
pub struct ReconcilerConfig {
    /// Domain used for `<domain>/<name>.secret-hash` style annotation keys
    /// and for the owner label stamped on every enforced object.
    /// Env: SAAS_RECONCILER_ANNOTATIONS_DOMAIN
    #[envconfig(
        from = "SAAS_RECONCILER_ANNOTATIONS_DOMAIN",
        default = "saas.3scale.net"
    )]
    pub annotations_domain: String,

    /// Field manager used for server-side apply.
    /// Env: SAAS_RECONCILER_FIELD_MANAGER
    #[envconfig(
        from = "SAAS_RECONCILER_FIELD_MANAGER",
        default = "saas-operator"
    )]
    pub field_manager: String,

    /// Delete owned objects that are no longer part of the enforced batch.
    /// Env: SAAS_RECONCILER_PRUNE
    #[envconfig(from = "SAAS_RECONCILER_PRUNE", default = "true")]
    pub prune: bool,

    /// Comma-separated JSON pointers appended to the base exclusion set
    /// of every kind (e.g. "/metadata/annotations/foo~1bar").
    /// Env: SAAS_RECONCILER_EXTRA_EXCLUDED_PATHS
    #[envconfig(from = "SAAS_RECONCILER_EXTRA_EXCLUDED_PATHS")]
    pub extra_excluded_paths: Option<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            annotations_domain: DEFAULT_ANNOTATIONS_DOMAIN.to_string(),
            field_manager: "saas-operator".to_string(),
            prune: true,
            extra_excluded_paths: None,
        }
    }
}

impl ReconcilerConfig {
    /// Read the configuration from the environment and validate it.
    pub fn load() -> anyhow::Result<Self> {
        let cfg = Self::init_from_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ReconcileErr> {
        if self.annotations_domain.is_empty()
            || self.annotations_domain.contains('/')
        {
            return Err(ReconcileErr::InvalidConfig(format!(
                "annotations domain must be a bare DNS prefix, got {:?}",
                self.annotations_domain
            )));
        }
        if self.field_manager.is_empty() {
            return Err(ReconcileErr::InvalidConfig(
                "field manager must not be empty".into(),
            ));
        }
        self.extra_excluded_paths().map(|_| ())
    }

    pub fn extra_excluded_paths(&self) -> Result<Vec<FieldPath>, ReconcileErr> {
        self.extra_excluded_paths
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(FieldPath::parse)
            .collect()
    }

    /// Label key identifying objects enforced on behalf of an owner.
    pub fn owner_label_key(&self) -> String {
        format!("{}/owner-uid", self.annotations_domain)
    }
}
