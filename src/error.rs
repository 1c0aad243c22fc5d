use thiserror::Error;

/// Failures the core distinguishes by recovery strategy: fetch and launch
/// errors surface as retryable UI states, unknown-pod is a precondition
/// violation in the state store, and zero contexts is a startup condition
/// with its own user-facing message.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("cluster query failed: {detail}")]
    Fetch { detail: String },

    #[error("failed to launch port-forward for {namespace}/{pod}: {detail}")]
    Launch {
        namespace: String,
        pod: String,
        detail: String,
    },

    #[error("pod {namespace}/{pod} is not loaded in current state")]
    UnknownPod { namespace: String, pod: String },

    #[error("no Kubernetes contexts available; check `kubectl config get-contexts`")]
    NoContexts,
}

impl CoreError {
    pub fn fetch(detail: impl Into<String>) -> Self {
        Self::Fetch {
            detail: detail.into(),
        }
    }
}
