//! Field paths that enforcement must never overwrite.

use std::fmt;

use crate::config::ReconcilerConfig;
use crate::controller::ReconcileErr;
use crate::resources::ResourceObject;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Structured pointer into a resource object, rendered as an RFC 6901 JSON
/// Pointer (`/spec/ports/0/nodePort`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<Segment>);

impl FieldPath {
    pub fn root() -> Self {
        Self(vec![])
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.0.push(Segment::Key(key.into()));
        self
    }

    pub fn index(mut self, idx: usize) -> Self {
        self.0.push(Segment::Index(idx));
        self
    }

    /// Shorthand for a path made only of object keys.
    pub fn keys(keys: &[&str]) -> Self {
        keys.iter().fold(Self::root(), |p, k| p.key(*k))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Parse a JSON Pointer. Purely numeric tokens become indices.
    pub fn parse(pointer: &str) -> Result<Self, ReconcileErr> {
        let rest = pointer
            .strip_prefix('/')
            .ok_or_else(|| ReconcileErr::InvalidPath(pointer.to_string()))?;
        let mut segments = Vec::new();
        for token in rest.split('/') {
            if token.is_empty() {
                return Err(ReconcileErr::InvalidPath(pointer.to_string()));
            }
            let token = token.replace("~1", "/").replace("~0", "~");
            let segment = match token.parse::<usize>() {
                Ok(i) if is_array_index(&token) => Segment::Index(i),
                _ => Segment::Key(token),
            };
            segments.push(segment);
        }
        Ok(Self(segments))
    }
}

/// `0` or a digit run without a leading zero; anything else is a key.
fn is_array_index(token: &str) -> bool {
    token == "0"
        || (!token.starts_with('0')
            && !token.is_empty()
            && token.bytes().all(|b| b.is_ascii_digit()))
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.0 {
            match s {
                Segment::Key(k) => {
                    write!(f, "/{}", k.replace('~', "~0").replace('/', "~1"))?
                }
                Segment::Index(i) => write!(f, "/{}", i)?,
            }
        }
        Ok(())
    }
}

/// Exclusions attached to one object before application. Insertion order
/// is kept and duplicates are dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExclusionSet(Vec<FieldPath>);

impl ExclusionSet {
    pub fn push(&mut self, path: FieldPath) {
        if !self.0.contains(&path) {
            self.0.push(path);
        }
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.0.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldPath> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn pointers(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl FromIterator<FieldPath> for ExclusionSet {
    fn from_iter<I: IntoIterator<Item = FieldPath>>(iter: I) -> Self {
        let mut set = ExclusionSet::default();
        for p in iter {
            set.push(p);
        }
        set
    }
}

/// Per-object facts the policy cannot read from the object itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExclusionContext {
    /// An autoscaler owns the replica count of this workload.
    pub autoscaled: bool,
}

pub fn replicas_path() -> FieldPath {
    FieldPath::keys(&["spec", "replicas"])
}

pub fn cluster_ip_paths() -> [FieldPath; 2] {
    [
        FieldPath::keys(&["spec", "clusterIP"]),
        FieldPath::keys(&["spec", "clusterIPs"]),
    ]
}

pub fn node_port_path(idx: usize) -> FieldPath {
    FieldPath::keys(&["spec", "ports"]).index(idx).key("nodePort")
}

/// Status and API-server bookkeeping; excluded for every kind.
pub fn default_excluded_paths() -> Vec<FieldPath> {
    vec![
        FieldPath::keys(&["status"]),
        FieldPath::keys(&["metadata", "resourceVersion"]),
        FieldPath::keys(&["metadata", "generation"]),
        FieldPath::keys(&["metadata", "uid"]),
        FieldPath::keys(&["metadata", "creationTimestamp"]),
        FieldPath::keys(&["metadata", "managedFields"]),
        FieldPath::keys(&["metadata", "selfLink"]),
    ]
}

#[derive(Clone, Debug)]
pub struct ExclusionPolicy {
    base: Vec<FieldPath>,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self {
            base: default_excluded_paths(),
        }
    }
}

impl ExclusionPolicy {
    pub fn from_config(cfg: &ReconcilerConfig) -> Result<Self, ReconcileErr> {
        let mut base = default_excluded_paths();
        for p in cfg.extra_excluded_paths()? {
            if !base.contains(&p) {
                base.push(p);
            }
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &[FieldPath] {
        &self.base
    }

    /// Compute the exclusions of one concrete object. Must run against the
    /// object produced in the current cycle since port lists can change.
    pub fn compute(
        &self,
        object: &ResourceObject,
        ctx: ExclusionContext,
    ) -> ExclusionSet {
        let mut set: ExclusionSet = self.base.iter().cloned().collect();
        match object {
            ResourceObject::Deployment(_) | ResourceObject::StatefulSet(_) => {
                if ctx.autoscaled {
                    set.push(replicas_path());
                }
            }
            ResourceObject::Service(svc) => {
                for p in cluster_ip_paths() {
                    set.push(p);
                }
                let ports = svc
                    .spec
                    .as_ref()
                    .and_then(|s| s.ports.as_ref())
                    .map(Vec::len)
                    .unwrap_or(0);
                for idx in 0..ports {
                    set.push(node_port_path(idx));
                }
            }
            ResourceObject::HorizontalPodAutoscaler(_)
            | ResourceObject::PodDisruptionBudget(_)
            | ResourceObject::PodMonitor(_)
            | ResourceObject::GrafanaDashboard(_)
            | ResourceObject::SecretDefinition(_) => {}
        }
        set
    }
}
