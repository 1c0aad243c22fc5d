use crate::app::{App, AppCommand};
use crate::error::CoreError;
use crate::forward::{ForwardExitEvent, ForwardSupervisor};
use crate::kubectl::ClusterClient;
use crate::model::{TunnelConfig, TunnelKey};
use futures::future::join_all;
use tracing::{info, warn};

/// Fetches the context catalog and activates the context kubectl marks as
/// current, falling back to the first. Zero contexts is its own
/// user-facing condition, not an empty UI.
pub async fn load_contexts<C: ClusterClient>(app: &mut App, client: &C) {
    app.clear_error();
    app.set_status("Loading contexts…");
    match client.list_contexts().await {
        Ok(contexts) if contexts.is_empty() => {
            app.set_error(CoreError::NoContexts.to_string(), AppCommand::LoadContexts);
        }
        Ok(contexts) => {
            let chosen = contexts
                .iter()
                .find(|context| context.current)
                .unwrap_or(&contexts[0])
                .name
                .clone();
            app.store_mut().set_contexts(contexts);
            activate_context(app, client, &chosen).await;
        }
        Err(error) => {
            app.set_error(
                format!("Failed to load contexts: {error}"),
                AppCommand::LoadContexts,
            );
        }
    }
}

/// Switches the active context: replaces the namespace table and resets
/// selection and pods. Pods load on demand per namespace, which bounds
/// fetch fan-out to what the user actually wants to see.
pub async fn activate_context<C: ClusterClient>(app: &mut App, client: &C, context: &str) {
    app.clear_error();
    app.set_status(format!("Loading namespaces for '{context}'…"));
    app.store_mut().activate_context(context);
    match client.list_namespaces(context).await {
        Ok(namespaces) => {
            let count = namespaces.len();
            app.store_mut().set_namespaces(namespaces);
            app.mark_refreshed();
            app.set_status(format!("{count} namespace(s) in '{context}'"));
        }
        Err(error) => {
            app.set_error(
                format!("Failed to load namespaces for '{context}': {error}"),
                AppCommand::ActivateContext {
                    context: context.to_string(),
                },
            );
        }
    }
}

/// Re-fetches the namespace table, keeps the selection for every namespace
/// that still exists, and re-fetches pods only for the survivors.
pub async fn refresh<C: ClusterClient>(app: &mut App, client: &C) {
    let Some(context) = app.store().active_context().map(str::to_string) else {
        return;
    };

    app.clear_error();
    app.set_status("Refreshing…");
    match client.list_namespaces(&context).await {
        Ok(namespaces) => {
            app.store_mut().set_namespaces(namespaces);
            let survivors: Vec<String> = app
                .store()
                .visible_namespaces()
                .map(str::to_string)
                .collect();
            if survivors.is_empty() {
                app.store_mut().clear_pods();
            } else {
                load_pods_for_namespaces(app, client, &survivors).await;
            }
            app.mark_refreshed();
            app.set_status(format!("Refreshed '{context}'"));
        }
        Err(error) => {
            app.set_error(format!("Refresh failed: {error}"), AppCommand::Refresh);
        }
    }
}

/// Fan-out/fan-in pod loading: one independent fetch per namespace, issued
/// concurrently. A failed fetch is isolated to its namespace and lands as
/// an empty list; every completed result is merged through the store's
/// epoch check so a stale completion never overwrites a fresher one.
pub async fn load_pods_for_namespaces<C: ClusterClient>(
    app: &mut App,
    client: &C,
    namespaces: &[String],
) {
    let Some(context) = app.store().active_context().map(str::to_string) else {
        return;
    };
    if namespaces.is_empty() {
        app.store_mut().clear_pods();
        return;
    }

    let mut tagged = Vec::with_capacity(namespaces.len());
    for namespace in namespaces {
        let epoch = app.store_mut().begin_pod_fetch(namespace);
        tagged.push((namespace.clone(), epoch));
    }

    let fetches = tagged.into_iter().map(|(namespace, epoch)| {
        let context = context.clone();
        async move {
            let result = client.list_pods(&context, &namespace).await;
            (namespace, epoch, result)
        }
    });

    for (namespace, epoch, result) in join_all(fetches).await {
        let pods = match result {
            Ok(pods) => pods,
            Err(error) => {
                warn!("pod fetch failed for namespace {namespace}: {error}");
                Vec::new()
            }
        };
        app.store_mut().apply_pod_fetch(&namespace, epoch, pods);
    }
}

pub async fn toggle_namespace<C: ClusterClient>(app: &mut App, client: &C, name: &str) {
    if app.store().is_visible(name) {
        app.store_mut().hide_namespace(name);
        app.set_status(format!("Hid namespace '{name}'"));
        return;
    }

    app.store_mut().show_namespace(name);
    load_pods_for_namespaces(app, client, std::slice::from_ref(&name.to_string())).await;
    app.set_status(format!("Showing namespace '{name}'"));
}

/// Selects every namespace, narrowed to the configured allowed set when
/// one is present, then loads all their pods in parallel.
pub async fn select_all<C: ClusterClient>(app: &mut App, client: &C) {
    let allowed = app.allowed_namespaces().clone();
    let selected: std::collections::BTreeSet<String> = app
        .store()
        .namespaces()
        .iter()
        .map(|namespace| namespace.name.clone())
        .filter(|name| allowed.is_empty() || allowed.contains(name))
        .collect();

    let names: Vec<String> = selected.iter().cloned().collect();
    app.store_mut().set_visible_namespaces(selected);
    load_pods_for_namespaces(app, client, &names).await;
    app.set_status(format!("Selected {} namespace(s)", names.len()));
}

pub async fn select_only<C: ClusterClient>(app: &mut App, client: &C, name: &str) {
    app.store_mut()
        .set_visible_namespaces([name.to_string()].into_iter().collect());
    load_pods_for_namespaces(app, client, std::slice::from_ref(&name.to_string())).await;
    app.set_status(format!("Showing only namespace '{name}'"));
}

pub fn deselect_all(app: &mut App) {
    app.store_mut()
        .set_visible_namespaces(Default::default());
    app.store_mut().clear_pods();
    app.set_status("Deselected all namespaces");
}

/// Starts a tunnel unless one is already active under the same logical
/// key; a duplicate request is a no-op that reports the existing pid and
/// never reaches the supervisor.
pub async fn start_port_forward(
    app: &mut App,
    supervisor: &mut ForwardSupervisor,
    namespace: &str,
    pod: &str,
    remote_port: u16,
    local_port: u16,
) {
    let Some(context) = app.store().active_context().map(str::to_string) else {
        return;
    };
    let key = TunnelKey {
        context: context.clone(),
        namespace: namespace.to_string(),
        pod: pod.to_string(),
        remote_port,
    };

    if let Some(existing) = app.store().active_tunnel(&key) {
        let pid = existing.pid;
        app.set_status(format!("Port-forward already active for {key} (pid {pid})"));
        return;
    }
    if app.store().find_pod(namespace, pod).is_none() {
        app.set_status(
            CoreError::UnknownPod {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
            }
            .to_string(),
        );
        return;
    }

    match supervisor.start(&context, namespace, pod, local_port, remote_port) {
        Ok(pid) => {
            let config = TunnelConfig {
                key: key.clone(),
                local_port,
                pid,
                active: true,
            };
            if let Err(error) = app.store_mut().record_tunnel_start(config) {
                supervisor.stop(pid).await;
                app.set_status(error.to_string());
                return;
            }
            info!("port-forward started for {key} pid={pid}");
            app.set_status(format!(
                "Port-forward started {local_port}→{remote_port} for {namespace}/{pod} (pid {pid})"
            ));
        }
        Err(error) => {
            app.set_error(
                error.to_string(),
                AppCommand::StartPortForward {
                    namespace: namespace.to_string(),
                    pod: pod.to_string(),
                    remote_port,
                    local_port,
                },
            );
        }
    }
}

pub async fn stop_port_forward(
    app: &mut App,
    supervisor: &mut ForwardSupervisor,
    namespace: &str,
    pod: &str,
    remote_port: u16,
) {
    let Some(context) = app.store().active_context().map(str::to_string) else {
        return;
    };
    let key = TunnelKey {
        context,
        namespace: namespace.to_string(),
        pod: pod.to_string(),
        remote_port,
    };

    let Some(config) = app.store_mut().record_tunnel_stop(&key) else {
        app.set_status(format!("No active port-forward for {key}"));
        return;
    };

    supervisor.stop(config.pid).await;
    app.set_status(format!(
        "Port-forward stopped {}→{} for {namespace}/{pod}",
        config.local_port, remote_port
    ));
}

/// Reconciles an autonomous process exit into both views of the tunnel:
/// the supervisor's live map and the store's registry. Both removals are
/// no-ops when an explicit stop already handled the entry.
pub fn handle_forward_exit(
    app: &mut App,
    supervisor: &mut ForwardSupervisor,
    event: ForwardExitEvent,
) {
    supervisor.handle_exit(event.pid);
    let removed = app.store_mut().remove_tunnel_by_pid(event.pid);

    let Some(config) = removed else {
        return;
    };
    let key = &config.key;
    match event.result {
        Ok(status) if status.success() => {
            app.set_status(format!("Port-forward closed for {key}"));
        }
        Ok(status) => {
            app.set_status(format!("Port-forward exited ({status}) for {key}"));
        }
        Err(error) => {
            app.set_status(format!("Port-forward failed for {key}: {error}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::model::{ContainerPort, KubeContext, NamespaceInfo, NamespacePhase, PodInfo};
    use std::cell::RefCell;
    use std::collections::{BTreeSet, HashMap, HashSet};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct FakeClient {
        contexts: Vec<KubeContext>,
        namespaces: HashMap<String, Vec<NamespaceInfo>>,
        pods: HashMap<(String, String), Vec<PodInfo>>,
        failing_namespaces: HashSet<String>,
        pod_fetch_log: RefCell<Vec<String>>,
    }

    impl ClusterClient for FakeClient {
        async fn list_contexts(&self) -> Result<Vec<KubeContext>, CoreError> {
            Ok(self.contexts.clone())
        }

        async fn list_namespaces(&self, context: &str) -> Result<Vec<NamespaceInfo>, CoreError> {
            self.namespaces
                .get(context)
                .cloned()
                .ok_or_else(|| CoreError::fetch(format!("no such context {context}")))
        }

        async fn list_pods(
            &self,
            context: &str,
            namespace: &str,
        ) -> Result<Vec<PodInfo>, CoreError> {
            self.pod_fetch_log.borrow_mut().push(namespace.to_string());
            if self.failing_namespaces.contains(namespace) {
                return Err(CoreError::fetch(format!("forbidden namespace {namespace}")));
            }
            Ok(self
                .pods
                .get(&(context.to_string(), namespace.to_string()))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn context(name: &str, current: bool) -> KubeContext {
        KubeContext {
            name: name.to_string(),
            cluster: format!("{name}-cluster"),
            auth_info: "admin".to_string(),
            namespace: None,
            current,
        }
    }

    fn namespace(name: &str) -> NamespaceInfo {
        NamespaceInfo {
            name: name.to_string(),
            phase: NamespacePhase::Active,
            created: None,
        }
    }

    fn pod(namespace: &str, name: &str, port: u16) -> PodInfo {
        PodInfo {
            name: name.to_string(),
            namespace: namespace.to_string(),
            status: "Running".to_string(),
            created: None,
            ports: vec![ContainerPort {
                name: None,
                port,
                protocol: "TCP".to_string(),
            }],
        }
    }

    fn fake_client() -> FakeClient {
        let mut client = FakeClient {
            contexts: vec![context("prod", true), context("staging", false)],
            ..FakeClient::default()
        };
        client.namespaces.insert(
            "prod".to_string(),
            vec![namespace("default"), namespace("kube-system")],
        );
        client
            .namespaces
            .insert("staging".to_string(), vec![namespace("default")]);
        client.pods.insert(
            ("prod".to_string(), "default".to_string()),
            vec![pod("default", "web-1", 8080)],
        );
        client.pods.insert(
            ("prod".to_string(), "kube-system".to_string()),
            vec![pod("kube-system", "coredns-1", 53)],
        );
        client
    }

    fn app() -> App {
        App::new(BTreeSet::new())
    }

    fn supervisor_with(bin: &str) -> ForwardSupervisor {
        let (tx, _rx) = mpsc::unbounded_channel();
        ForwardSupervisor::new(bin, tx)
    }

    #[tokio::test]
    async fn load_contexts_activates_the_current_context() {
        let client = fake_client();
        let mut app = app();

        load_contexts(&mut app, &client).await;

        assert_eq!(app.store().active_context(), Some("prod"));
        assert_eq!(app.store().namespaces().len(), 2);
        assert!(app.error().is_none());
    }

    #[tokio::test]
    async fn load_contexts_falls_back_to_the_first_context() {
        let mut client = fake_client();
        for context in &mut client.contexts {
            context.current = false;
        }
        let mut app = app();

        load_contexts(&mut app, &client).await;

        assert_eq!(app.store().active_context(), Some("prod"));
    }

    #[tokio::test]
    async fn zero_contexts_surfaces_a_retryable_error() {
        let client = FakeClient::default();
        let mut app = app();

        load_contexts(&mut app, &client).await;

        let error = app.error().expect("error state");
        assert_eq!(error.retry, AppCommand::LoadContexts);
        assert!(error.message.contains("no Kubernetes contexts"));
    }

    #[tokio::test]
    async fn toggle_on_then_off_leaves_no_pods_and_fetches_once() {
        let client = fake_client();
        let mut app = app();
        load_contexts(&mut app, &client).await;

        toggle_namespace(&mut app, &client, "default").await;
        assert_eq!(app.store().visible_pods().len(), 1);

        toggle_namespace(&mut app, &client, "default").await;
        assert!(app.store().pods_in("default").is_none());
        assert!(app.store().visible_pods().is_empty());

        // Exactly one fetch for the toggled namespace, none for others.
        assert_eq!(*client.pod_fetch_log.borrow(), vec!["default".to_string()]);
    }

    #[tokio::test]
    async fn reshowing_a_namespace_fetches_fresh_data() {
        let client = fake_client();
        let mut app = app();
        load_contexts(&mut app, &client).await;

        toggle_namespace(&mut app, &client, "default").await;
        toggle_namespace(&mut app, &client, "default").await;
        toggle_namespace(&mut app, &client, "default").await;

        assert_eq!(app.store().visible_pods().len(), 1);
        assert_eq!(
            *client.pod_fetch_log.borrow(),
            vec!["default".to_string(), "default".to_string()]
        );
    }

    #[tokio::test]
    async fn refresh_keeps_surviving_selections_and_drops_vanished_ones() {
        let mut client = fake_client();
        let mut app = app();
        load_contexts(&mut app, &client).await;
        toggle_namespace(&mut app, &client, "default").await;
        toggle_namespace(&mut app, &client, "kube-system").await;

        // kube-system disappears from the cluster before the next refresh.
        client
            .namespaces
            .insert("prod".to_string(), vec![namespace("default")]);
        client.pod_fetch_log.borrow_mut().clear();

        refresh(&mut app, &client).await;

        assert!(app.store().is_visible("default"));
        assert!(!app.store().is_visible("kube-system"));
        assert!(app.store().pods_in("kube-system").is_none());
        assert_eq!(*client.pod_fetch_log.borrow(), vec!["default".to_string()]);
    }

    #[tokio::test]
    async fn refresh_with_no_selection_clears_pods_without_fetching() {
        let client = fake_client();
        let mut app = app();
        load_contexts(&mut app, &client).await;

        refresh(&mut app, &client).await;

        assert!(app.store().visible_pods().is_empty());
        assert!(client.pod_fetch_log.borrow().is_empty());
    }

    #[tokio::test]
    async fn failed_pod_fetch_is_isolated_to_its_namespace() {
        let mut client = fake_client();
        client.failing_namespaces.insert("kube-system".to_string());
        let mut app = app();
        load_contexts(&mut app, &client).await;

        select_all(&mut app, &client).await;

        assert_eq!(app.store().pods_in("kube-system"), Some(&[][..]));
        assert_eq!(app.store().visible_pods().len(), 1);
        assert!(app.error().is_none());
    }

    #[tokio::test]
    async fn select_all_honors_the_allowed_namespace_set() {
        let client = fake_client();
        let mut app = App::new(["default".to_string()].into_iter().collect());
        load_contexts(&mut app, &client).await;

        select_all(&mut app, &client).await;

        assert!(app.store().is_visible("default"));
        assert!(!app.store().is_visible("kube-system"));
        assert_eq!(*client.pod_fetch_log.borrow(), vec!["default".to_string()]);
    }

    #[tokio::test]
    async fn select_only_and_deselect_all_manage_pod_eviction() {
        let client = fake_client();
        let mut app = app();
        load_contexts(&mut app, &client).await;
        select_all(&mut app, &client).await;

        select_only(&mut app, &client, "kube-system").await;
        assert!(app.store().pods_in("default").is_none());
        assert_eq!(app.store().visible_pods().len(), 1);

        deselect_all(&mut app);
        assert!(app.store().visible_pods().is_empty());
    }

    #[tokio::test]
    async fn duplicate_forward_start_is_a_no_op_with_the_existing_pid() {
        let client = fake_client();
        let mut app = app();
        load_contexts(&mut app, &client).await;
        toggle_namespace(&mut app, &client, "default").await;

        let mut supervisor = supervisor_with("true");
        start_port_forward(&mut app, &mut supervisor, "default", "web-1", 8080, 8080).await;
        let active = supervisor.list_active();
        assert_eq!(active.len(), 1);
        let pid = active[0].0;

        start_port_forward(&mut app, &mut supervisor, "default", "web-1", 8080, 9090).await;

        assert_eq!(supervisor.list_active().len(), 1);
        assert_eq!(app.store().tunnel_count(), 1);
        assert!(app.status().contains(&format!("pid {pid}")));
    }

    #[tokio::test]
    async fn forward_launch_failure_sets_a_retryable_error() {
        let client = fake_client();
        let mut app = app();
        load_contexts(&mut app, &client).await;
        toggle_namespace(&mut app, &client, "default").await;

        let mut supervisor = supervisor_with("/nonexistent/portside-kubectl");
        start_port_forward(&mut app, &mut supervisor, "default", "web-1", 8080, 8080).await;

        let error = app.error().expect("error state");
        assert_eq!(
            error.retry,
            AppCommand::StartPortForward {
                namespace: "default".to_string(),
                pod: "web-1".to_string(),
                remote_port: 8080,
                local_port: 8080,
            }
        );
        assert_eq!(app.store().tunnel_count(), 0);
    }

    #[tokio::test]
    async fn stop_removes_both_views_of_the_tunnel() {
        let client = fake_client();
        let mut app = app();
        load_contexts(&mut app, &client).await;
        toggle_namespace(&mut app, &client, "default").await;

        let mut supervisor = supervisor_with("true");
        start_port_forward(&mut app, &mut supervisor, "default", "web-1", 8080, 8080).await;
        assert_eq!(app.store().tunnel_count(), 1);

        stop_port_forward(&mut app, &mut supervisor, "default", "web-1", 8080).await;

        assert_eq!(app.store().tunnel_count(), 0);
        assert!(supervisor.list_active().is_empty());
    }

    #[tokio::test]
    async fn autonomous_exit_reconciles_store_and_supervisor() {
        let client = fake_client();
        let mut app = app();
        load_contexts(&mut app, &client).await;
        toggle_namespace(&mut app, &client, "default").await;

        let mut supervisor = supervisor_with("true");
        start_port_forward(&mut app, &mut supervisor, "default", "web-1", 8080, 8080).await;
        let pid = supervisor.list_active()[0].0;

        handle_forward_exit(
            &mut app,
            &mut supervisor,
            ForwardExitEvent {
                pid,
                result: Err("lost connection to pod".to_string()),
            },
        );

        assert!(supervisor.list_active().is_empty());
        assert_eq!(app.store().tunnel_count(), 0);
        assert!(app.status().contains("lost connection"));
    }
}
