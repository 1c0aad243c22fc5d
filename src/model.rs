use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NamespacePhase {
    Active,
    Terminating,
    Unknown,
}

impl NamespacePhase {
    pub fn from_phase(phase: Option<&str>) -> Self {
        match phase {
            Some("Active") => Self::Active,
            Some("Terminating") => Self::Terminating,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Terminating => "Terminating",
            Self::Unknown => "Unknown",
        }
    }
}

impl Display for NamespacePhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One kubeconfig context row: name, cluster, auth identity, and the
/// optional default namespace kubectl reports for it. Replaced wholesale
/// on every refresh, never merged.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct KubeContext {
    pub name: String,
    pub cluster: String,
    pub auth_info: String,
    pub namespace: Option<String>,
    pub current: bool,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NamespaceInfo {
    pub name: String,
    pub phase: NamespacePhase,
    pub created: Option<Time>,
}

impl NamespaceInfo {
    pub fn age(&self) -> String {
        human_age(self.created.as_ref())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ContainerPort {
    pub name: Option<String>,
    pub port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub status: String,
    pub created: Option<Time>,
    pub ports: Vec<ContainerPort>,
}

impl PodInfo {
    pub fn age(&self) -> String {
        human_age(self.created.as_ref())
    }
}

/// Natural key of one tunnel. A key maps to at most one active tunnel at
/// any time; uniqueness is enforced before the supervisor is contacted.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TunnelKey {
    pub context: String,
    pub namespace: String,
    pub pod: String,
    pub remote_port: u16,
}

impl Display for TunnelKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}/{}:{}",
            self.context, self.namespace, self.pod, self.remote_port
        )
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TunnelConfig {
    pub key: TunnelKey,
    pub local_port: u16,
    pub pid: u32,
    pub active: bool,
}

/// Renders an age relative to now, bucketed to the coarsest nonzero unit.
/// A missing creation timestamp is reported as `Unknown`, never an error.
pub fn human_age(timestamp: Option<&Time>) -> String {
    let Some(timestamp) = timestamp else {
        return "Unknown".to_string();
    };

    let elapsed_seconds = (chrono::Utc::now().timestamp() - timestamp.0.as_second()).max(0);
    format_elapsed_seconds(elapsed_seconds)
}

pub fn format_elapsed_seconds(seconds: i64) -> String {
    if seconds >= 86_400 {
        return format!("{}d", seconds / 86_400);
    }

    if seconds >= 3_600 {
        return format!("{}h", seconds / 3_600);
    }

    if seconds >= 60 {
        return format!("{}m", seconds / 60);
    }

    format!("{seconds}s")
}
