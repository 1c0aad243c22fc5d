use crate::error::CoreError;
use crate::model::{KubeContext, NamespaceInfo, PodInfo, TunnelConfig, TunnelKey};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// In-memory index of everything fetched from the cluster, scoped to the
/// active context: the namespace table, the visible-namespace set, the
/// per-namespace pod lists, and the tunnel registry.
///
/// Tunnels are kept in a single flat map keyed by the full
/// `(context, namespace, pod, remote_port)` tuple, so "present in the map"
/// always means "live entry" and there are no intermediate levels to prune.
/// Tunnel entries outlive namespace visibility and context switches; only
/// an explicit stop or a process exit removes them.
///
/// All mutation happens on the event-loop thread. The only concurrency the
/// store has to survive is overlapping pod fetches completing out of order,
/// which is handled by a monotonic per-namespace fetch epoch: a completion
/// carrying a stale epoch is discarded instead of overwriting fresher data.
#[derive(Debug, Default)]
pub struct ResourceStore {
    contexts: Vec<KubeContext>,
    active_context: Option<String>,
    namespaces: Vec<NamespaceInfo>,
    visible: BTreeSet<String>,
    pods: BTreeMap<String, Vec<PodInfo>>,
    tunnels: BTreeMap<TunnelKey, TunnelConfig>,
    fetch_epochs: HashMap<String, u64>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contexts(&self) -> &[KubeContext] {
        &self.contexts
    }

    pub fn active_context(&self) -> Option<&str> {
        self.active_context.as_deref()
    }

    pub fn namespaces(&self) -> &[NamespaceInfo] {
        &self.namespaces
    }

    pub fn visible_namespaces(&self) -> impl Iterator<Item = &str> {
        self.visible.iter().map(String::as_str)
    }

    pub fn is_visible(&self, namespace: &str) -> bool {
        self.visible.contains(namespace)
    }

    pub fn set_contexts(&mut self, contexts: Vec<KubeContext>) {
        self.contexts = contexts;
    }

    /// Makes `context` the active one and drops everything scoped to the
    /// previous context: namespace table, selection, and pod lists. Pods
    /// are loaded on demand per namespace, never eagerly for a context.
    pub fn activate_context(&mut self, context: &str) {
        self.active_context = Some(context.to_string());
        self.namespaces.clear();
        self.visible.clear();
        self.pods.clear();
        self.fetch_epochs.clear();
    }

    /// Wholesale replacement of the namespace table for the active context.
    /// Selection entries whose namespace no longer exists are pruned, along
    /// with their pod lists; surviving selections are untouched.
    pub fn set_namespaces(&mut self, namespaces: Vec<NamespaceInfo>) {
        let valid: BTreeSet<&str> = namespaces.iter().map(|ns| ns.name.as_str()).collect();
        self.visible.retain(|name| valid.contains(name.as_str()));
        self.pods.retain(|name, _| self.visible.contains(name));
        self.namespaces = namespaces;
    }

    pub fn show_namespace(&mut self, namespace: &str) {
        self.visible.insert(namespace.to_string());
    }

    /// Hides a namespace and evicts its pod list entirely. Tunnels for pods
    /// in the namespace are deliberately left alone; they are independent
    /// long-lived resources not tied to visibility.
    pub fn hide_namespace(&mut self, namespace: &str) {
        self.visible.remove(namespace);
        self.pods.remove(namespace);
    }

    /// Replaces the visible set in one step (select-all / select-only /
    /// deselect-all), evicting pods for anything no longer selected.
    pub fn set_visible_namespaces(&mut self, namespaces: BTreeSet<String>) {
        self.pods.retain(|name, _| namespaces.contains(name));
        self.visible = namespaces;
    }

    pub fn clear_pods(&mut self) {
        self.pods.clear();
    }

    /// Wholesale replacement of one namespace's pod list. Writes for
    /// namespaces that are not currently visible are dropped so the pod
    /// table never holds entries outside the visible set.
    pub fn set_pods(&mut self, namespace: &str, pods: Vec<PodInfo>) {
        if !self.visible.contains(namespace) {
            tracing::debug!("discarding pods for hidden namespace {namespace}");
            return;
        }
        self.pods.insert(namespace.to_string(), pods);
    }

    /// Marks the start of a pod fetch for `namespace` and returns its epoch.
    /// The matching `apply_pod_fetch` only lands if no newer fetch has been
    /// issued since, which resolves the rapid-toggle race where a stale
    /// response would otherwise overwrite fresher data.
    pub fn begin_pod_fetch(&mut self, namespace: &str) -> u64 {
        let epoch = self.fetch_epochs.entry(namespace.to_string()).or_insert(0);
        *epoch += 1;
        *epoch
    }

    pub fn apply_pod_fetch(&mut self, namespace: &str, epoch: u64, pods: Vec<PodInfo>) -> bool {
        if self.fetch_epochs.get(namespace).copied() != Some(epoch) {
            tracing::debug!("discarding stale pod fetch for {namespace} (epoch {epoch})");
            return false;
        }
        if !self.visible.contains(namespace) {
            return false;
        }
        self.pods.insert(namespace.to_string(), pods);
        true
    }

    /// Pods across all visible namespaces, in namespace order, reflecting
    /// the latest replacement for each. Partially-populated states during a
    /// fan-out are expected; callers get whatever has landed so far.
    pub fn visible_pods(&self) -> Vec<&PodInfo> {
        self.visible
            .iter()
            .filter_map(|namespace| self.pods.get(namespace))
            .flatten()
            .collect()
    }

    pub fn pods_in(&self, namespace: &str) -> Option<&[PodInfo]> {
        self.pods.get(namespace).map(Vec::as_slice)
    }

    pub fn find_pod(&self, namespace: &str, pod: &str) -> Option<&PodInfo> {
        self.pods
            .get(namespace)
            .and_then(|pods| pods.iter().find(|p| p.name == pod))
    }

    /// Records a started tunnel. Precondition: the pod must currently be
    /// loaded; recording against an unknown pod is refused. In practice the
    /// orchestrator resolves the pod before the supervisor is ever called,
    /// so a violation here indicates a caller bug.
    pub fn record_tunnel_start(&mut self, config: TunnelConfig) -> Result<(), CoreError> {
        if self.find_pod(&config.key.namespace, &config.key.pod).is_none() {
            return Err(CoreError::UnknownPod {
                namespace: config.key.namespace.clone(),
                pod: config.key.pod.clone(),
            });
        }
        self.tunnels.insert(config.key.clone(), config);
        Ok(())
    }

    /// Removes the tunnel under `key`. Removing an absent key is a no-op;
    /// both the explicit-stop path and the autonomous-exit path may try.
    pub fn record_tunnel_stop(&mut self, key: &TunnelKey) -> Option<TunnelConfig> {
        self.tunnels.remove(key)
    }

    pub fn active_tunnel(&self, key: &TunnelKey) -> Option<&TunnelConfig> {
        self.tunnels.get(key).filter(|config| config.active)
    }

    pub fn tunnel_for_pod_port(
        &self,
        context: &str,
        namespace: &str,
        pod: &str,
        remote_port: u16,
    ) -> Option<&TunnelConfig> {
        self.active_tunnel(&TunnelKey {
            context: context.to_string(),
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            remote_port,
        })
    }

    /// Reconciles an autonomous process exit back into the tunnel registry.
    pub fn remove_tunnel_by_pid(&mut self, pid: u32) -> Option<TunnelConfig> {
        let key = self
            .tunnels
            .values()
            .find(|config| config.pid == pid)
            .map(|config| config.key.clone())?;
        self.tunnels.remove(&key)
    }

    pub fn tunnel_count(&self) -> usize {
        self.tunnels.len()
    }
}
