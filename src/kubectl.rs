use crate::error::CoreError;
use crate::model::{ContainerPort, KubeContext, NamespaceInfo, NamespacePhase, PodInfo};
use k8s_openapi::List;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use std::process::Stdio;
use tokio::process::Command as TokioCommand;
use tracing::debug;

/// Read side of the cluster: everything the refresh orchestrator needs.
/// The production binding shells out to kubectl; tests drive the
/// orchestrator with an in-memory implementation instead.
pub trait ClusterClient {
    async fn list_contexts(&self) -> Result<Vec<KubeContext>, CoreError>;
    async fn list_namespaces(&self, context: &str) -> Result<Vec<NamespaceInfo>, CoreError>;
    async fn list_pods(&self, context: &str, namespace: &str) -> Result<Vec<PodInfo>, CoreError>;
}

/// Shell-exec binding over the kubectl binary. Holds no cluster
/// connection of its own; every call is one subprocess invocation.
#[derive(Debug, Clone)]
pub struct KubectlClient {
    kubectl_bin: String,
}

impl KubectlClient {
    pub fn new(kubectl_bin: impl Into<String>) -> Self {
        Self {
            kubectl_bin: kubectl_bin.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, CoreError> {
        debug!("exec {} {}", self.kubectl_bin, args.join(" "));
        let output = TokioCommand::new(&self.kubectl_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|error| {
                CoreError::fetch(format!("failed to execute {}: {error}", self.kubectl_bin))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::fetch(format!(
                "{} {} exited with {}: {}",
                self.kubectl_bin,
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        Ok(stdout)
    }
}

impl ClusterClient for KubectlClient {
    async fn list_contexts(&self) -> Result<Vec<KubeContext>, CoreError> {
        let table = self.run(&["config", "get-contexts"]).await?;

        // `current-context` fails on an empty kubeconfig; the `*` marker in
        // the table output still identifies the current row then.
        let current = match self.run(&["config", "current-context"]).await {
            Ok(output) => Some(output.trim().to_string()),
            Err(error) => {
                debug!("current-context unavailable: {error}");
                None
            }
        };

        Ok(parse_context_table(&table, current.as_deref()))
    }

    async fn list_namespaces(&self, context: &str) -> Result<Vec<NamespaceInfo>, CoreError> {
        let raw = self
            .run(&["--context", context, "get", "namespaces", "-o", "json"])
            .await?;
        let list: List<Namespace> = serde_json::from_str(&raw)
            .map_err(|error| CoreError::fetch(format!("malformed namespace list: {error}")))?;

        Ok(list
            .items
            .into_iter()
            .filter_map(namespace_from_manifest)
            .collect())
    }

    async fn list_pods(&self, context: &str, namespace: &str) -> Result<Vec<PodInfo>, CoreError> {
        let raw = self
            .run(&[
                "--context", context, "get", "pods", "-n", namespace, "-o", "json",
            ])
            .await?;
        let list: List<Pod> = serde_json::from_str(&raw)
            .map_err(|error| CoreError::fetch(format!("malformed pod list: {error}")))?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|pod| pod_from_manifest(pod, namespace))
            .collect())
    }
}

/// Parses `kubectl config get-contexts` column output. The first line is
/// the header; a leading `*` marks the current context and shifts every
/// column one position right.
fn parse_context_table(output: &str, current: Option<&str>) -> Vec<KubeContext> {
    let mut contexts = Vec::new();
    for line in output.trim().lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            continue;
        }

        let starred = parts[0] == "*";
        let offset = usize::from(starred);
        let Some(name) = parts.get(offset) else {
            continue;
        };
        let cluster = parts.get(offset + 1).copied().unwrap_or_default();
        let auth_info = parts.get(offset + 2).copied().unwrap_or_default();
        let namespace = parts.get(offset + 3).map(|ns| ns.to_string());

        contexts.push(KubeContext {
            name: name.to_string(),
            cluster: cluster.to_string(),
            auth_info: auth_info.to_string(),
            namespace,
            current: starred || current == Some(name),
        });
    }

    contexts
}

fn namespace_from_manifest(manifest: Namespace) -> Option<NamespaceInfo> {
    let name = manifest.metadata.name?;
    if name.is_empty() {
        return None;
    }

    Some(NamespaceInfo {
        name,
        phase: NamespacePhase::from_phase(
            manifest
                .status
                .as_ref()
                .and_then(|status| status.phase.as_deref()),
        ),
        created: manifest.metadata.creation_timestamp,
    })
}

fn pod_from_manifest(manifest: Pod, namespace: &str) -> Option<PodInfo> {
    let name = manifest.metadata.name?;
    if name.is_empty() {
        return None;
    }

    let status = manifest
        .status
        .as_ref()
        .and_then(|status| status.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string());

    let mut ports = Vec::new();
    if let Some(spec) = manifest.spec.as_ref() {
        for container in &spec.containers {
            for port in container.ports.as_deref().unwrap_or_default() {
                let Ok(number) = u16::try_from(port.container_port) else {
                    continue;
                };
                ports.push(ContainerPort {
                    name: port.name.clone(),
                    port: number,
                    protocol: port
                        .protocol
                        .clone()
                        .unwrap_or_else(|| "TCP".to_string()),
                });
            }
        }
    }

    Some(PodInfo {
        name,
        namespace: namespace.to_string(),
        status,
        created: manifest.metadata.creation_timestamp,
        ports,
    })
}
