use crate::input::Action;
use crate::model::{NamespaceInfo, PodInfo, TunnelConfig};
use crate::store::ResourceStore;
use chrono::{DateTime, Local};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    Normal,
    LocalPort,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FocusPane {
    Namespaces,
    Pods,
}

/// Work the event loop has to perform on behalf of the UI. Produced by
/// `App::apply_action`, executed by the orchestrator against the cluster
/// client and the tunnel supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    None,
    LoadContexts,
    ActivateContext {
        context: String,
    },
    Refresh,
    ToggleNamespace {
        name: String,
    },
    SelectAllNamespaces,
    SelectOnlyNamespace {
        name: String,
    },
    DeselectAllNamespaces,
    StartPortForward {
        namespace: String,
        pod: String,
        remote_port: u16,
        local_port: u16,
    },
    StopPortForward {
        namespace: String,
        pod: String,
        remote_port: u16,
    },
}

/// A retryable failure surfaced to the user: the message plus the command
/// that reproduces the step that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorState {
    pub message: String,
    pub retry: AppCommand,
}

/// One row of the pod table: a pod paired with one of its container
/// ports, or with none when the pod exposes no forwardable port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRow {
    pub namespace: String,
    pub pod: String,
    pub status: String,
    pub age: String,
    pub port_name: Option<String>,
    pub remote_port: Option<u16>,
    pub protocol: Option<String>,
}

pub struct App {
    store: ResourceStore,
    running: bool,
    mode: InputMode,
    focus: FocusPane,
    status: String,
    error: Option<ErrorState>,
    namespace_index: usize,
    pod_index: usize,
    input: String,
    pending_forward: Option<(String, String, u16)>,
    allowed_namespaces: BTreeSet<String>,
    refreshed_at: Option<DateTime<Local>>,
}

impl App {
    pub fn new(allowed_namespaces: BTreeSet<String>) -> Self {
        Self {
            store: ResourceStore::new(),
            running: true,
            mode: InputMode::Normal,
            focus: FocusPane::Namespaces,
            status: "Loading contexts…".to_string(),
            error: None,
            namespace_index: 0,
            pod_index: 0,
            input: String::new(),
            pending_forward: None,
            allowed_namespaces,
            refreshed_at: None,
        }
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ResourceStore {
        &mut self.store
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn focus(&self) -> FocusPane {
        self.focus
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn error(&self) -> Option<&ErrorState> {
        self.error.as_ref()
    }

    pub fn set_error(&mut self, message: impl Into<String>, retry: AppCommand) {
        self.error = Some(ErrorState {
            message: message.into(),
            retry,
        });
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn pending_forward(&self) -> Option<&(String, String, u16)> {
        self.pending_forward.as_ref()
    }

    pub fn allowed_namespaces(&self) -> &BTreeSet<String> {
        &self.allowed_namespaces
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Local>> {
        self.refreshed_at
    }

    pub fn mark_refreshed(&mut self) {
        self.refreshed_at = Some(Local::now());
    }

    pub fn selected_namespace(&self) -> Option<&NamespaceInfo> {
        let namespaces = self.store.namespaces();
        if namespaces.is_empty() {
            return None;
        }
        namespaces.get(self.namespace_index.min(namespaces.len() - 1))
    }

    pub fn namespace_index(&self) -> usize {
        let len = self.store.namespaces().len();
        if len == 0 {
            0
        } else {
            self.namespace_index.min(len - 1)
        }
    }

    pub fn pod_index(&self) -> usize {
        let len = self.pod_rows().len();
        if len == 0 { 0 } else { self.pod_index.min(len - 1) }
    }

    /// Flattens visible pods into table rows, one row per container port.
    /// A pod without declared ports still gets a row so it stays visible;
    /// it just cannot be forwarded to.
    pub fn pod_rows(&self) -> Vec<PodRow> {
        let mut rows = Vec::new();
        for pod in self.store.visible_pods() {
            if pod.ports.is_empty() {
                rows.push(Self::row_for(pod, None));
                continue;
            }
            for port in &pod.ports {
                rows.push(PodRow {
                    namespace: pod.namespace.clone(),
                    pod: pod.name.clone(),
                    status: pod.status.clone(),
                    age: pod.age(),
                    port_name: port.name.clone(),
                    remote_port: Some(port.port),
                    protocol: Some(port.protocol.clone()),
                });
            }
        }
        rows
    }

    fn row_for(pod: &PodInfo, remote_port: Option<u16>) -> PodRow {
        PodRow {
            namespace: pod.namespace.clone(),
            pod: pod.name.clone(),
            status: pod.status.clone(),
            age: pod.age(),
            port_name: None,
            remote_port,
            protocol: None,
        }
    }

    pub fn selected_pod_row(&self) -> Option<PodRow> {
        let rows = self.pod_rows();
        if rows.is_empty() {
            return None;
        }
        rows.into_iter().nth(self.pod_index())
    }

    pub fn tunnel_for_row(&self, row: &PodRow) -> Option<&TunnelConfig> {
        let context = self.store.active_context()?;
        let remote_port = row.remote_port?;
        self.store
            .tunnel_for_pod_port(context, &row.namespace, &row.pod, remote_port)
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        match self.mode {
            InputMode::Normal => self.apply_normal_action(action),
            InputMode::LocalPort => self.apply_port_input_action(action),
        }
    }

    fn apply_normal_action(&mut self, action: Action) -> AppCommand {
        match action {
            Action::Quit => {
                self.running = false;
                AppCommand::None
            }
            Action::Down => {
                self.move_selection(1);
                AppCommand::None
            }
            Action::Up => {
                self.move_selection(-1);
                AppCommand::None
            }
            Action::ToggleFocus => {
                self.focus = match self.focus {
                    FocusPane::Namespaces => FocusPane::Pods,
                    FocusPane::Pods => FocusPane::Namespaces,
                };
                AppCommand::None
            }
            Action::NextContext => self.adjacent_context_command(1),
            Action::PrevContext => self.adjacent_context_command(-1),
            Action::Refresh => AppCommand::Refresh,
            Action::ToggleSelected => match self.focus {
                FocusPane::Namespaces => match self.selected_namespace() {
                    Some(namespace) => AppCommand::ToggleNamespace {
                        name: namespace.name.clone(),
                    },
                    None => AppCommand::None,
                },
                FocusPane::Pods => self.toggle_forward_command(),
            },
            Action::SelectAll => AppCommand::SelectAllNamespaces,
            Action::SelectOnly => match self.selected_namespace() {
                Some(namespace) => AppCommand::SelectOnlyNamespace {
                    name: namespace.name.clone(),
                },
                None => AppCommand::None,
            },
            Action::DeselectAll => AppCommand::DeselectAllNamespaces,
            Action::StartForwardPrompt => self.start_forward_prompt(),
            Action::Retry => match self.error.take() {
                Some(error) => {
                    self.status = "Retrying…".to_string();
                    error.retry
                }
                None => AppCommand::None,
            },
            Action::ClearMessage => {
                self.error = None;
                self.status = "Ready".to_string();
                AppCommand::None
            }
            _ => AppCommand::None,
        }
    }

    fn apply_port_input_action(&mut self, action: Action) -> AppCommand {
        match action {
            Action::InputChar(c) if c.is_ascii_digit() && self.input.len() < 5 => {
                self.input.push(c);
                AppCommand::None
            }
            Action::Backspace => {
                self.input.pop();
                AppCommand::None
            }
            Action::CancelInput => {
                self.mode = InputMode::Normal;
                self.input.clear();
                self.pending_forward = None;
                AppCommand::None
            }
            Action::SubmitInput => self.submit_local_port(),
            _ => AppCommand::None,
        }
    }

    fn submit_local_port(&mut self) -> AppCommand {
        let Some((namespace, pod, remote_port)) = self.pending_forward.clone() else {
            self.mode = InputMode::Normal;
            self.input.clear();
            return AppCommand::None;
        };

        // An empty entry forwards to the same port number locally.
        let local_port = if self.input.is_empty() {
            remote_port
        } else {
            match self.input.parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => {
                    self.status = format!("'{}' is not a valid local port", self.input);
                    self.input.clear();
                    return AppCommand::None;
                }
            }
        };

        self.mode = InputMode::Normal;
        self.input.clear();
        self.pending_forward = None;
        AppCommand::StartPortForward {
            namespace,
            pod,
            remote_port,
            local_port,
        }
    }

    fn move_selection(&mut self, delta: i64) {
        let (index, len) = match self.focus {
            FocusPane::Namespaces => (self.namespace_index(), self.store.namespaces().len()),
            FocusPane::Pods => (self.pod_index(), self.pod_rows().len()),
        };
        if len == 0 {
            return;
        }
        let next = index
            .saturating_add_signed(delta as isize)
            .min(len - 1);
        match self.focus {
            FocusPane::Namespaces => self.namespace_index = next,
            FocusPane::Pods => self.pod_index = next,
        }
    }

    fn adjacent_context_command(&self, delta: i64) -> AppCommand {
        let contexts = self.store.contexts();
        if contexts.is_empty() {
            return AppCommand::None;
        }
        let active = self.store.active_context();
        let current = contexts
            .iter()
            .position(|context| Some(context.name.as_str()) == active)
            .unwrap_or(0);
        let next = current
            .saturating_add_signed(delta as isize)
            .min(contexts.len() - 1);
        if next == current {
            return AppCommand::None;
        }
        AppCommand::ActivateContext {
            context: contexts[next].name.clone(),
        }
    }

    fn toggle_forward_command(&mut self) -> AppCommand {
        let Some(row) = self.selected_pod_row() else {
            return AppCommand::None;
        };
        let Some(remote_port) = row.remote_port else {
            self.status = format!("{}/{} declares no container ports", row.namespace, row.pod);
            return AppCommand::None;
        };

        if self.tunnel_for_row(&row).is_some() {
            return AppCommand::StopPortForward {
                namespace: row.namespace,
                pod: row.pod,
                remote_port,
            };
        }

        AppCommand::StartPortForward {
            namespace: row.namespace,
            pod: row.pod,
            remote_port,
            local_port: remote_port,
        }
    }

    fn start_forward_prompt(&mut self) -> AppCommand {
        if self.focus != FocusPane::Pods {
            return AppCommand::None;
        }
        let Some(row) = self.selected_pod_row() else {
            return AppCommand::None;
        };
        let Some(remote_port) = row.remote_port else {
            self.status = format!("{}/{} declares no container ports", row.namespace, row.pod);
            return AppCommand::None;
        };
        if let Some(tunnel) = self.tunnel_for_row(&row) {
            self.status = format!(
                "Already forwarding {}→{} (pid {})",
                tunnel.local_port, remote_port, tunnel.pid
            );
            return AppCommand::None;
        }

        self.pending_forward = Some((row.namespace, row.pod, remote_port));
        self.input.clear();
        self.mode = InputMode::LocalPort;
        AppCommand::None
    }
}

#[cfg(test)]
mod tests {
    use super::{App, AppCommand, FocusPane, InputMode};
    use crate::input::Action;
    use crate::model::{
        ContainerPort, KubeContext, NamespaceInfo, NamespacePhase, PodInfo, TunnelConfig,
        TunnelKey,
    };
    use std::collections::BTreeSet;

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

    fn pod_with_port(namespace: &str, name: &str, port: u16) -> PodInfo {
        PodInfo {
            name: name.to_string(),
            namespace: namespace.to_string(),
            status: "Running".to_string(),
            created: None,
            ports: vec![ContainerPort {
                name: Some("http".to_string()),
                port,
                protocol: "TCP".to_string(),
            }],
        }
    }

    fn app_with_pod() -> App {
        let mut app = App::new(BTreeSet::new());
        app.store_mut().set_contexts(vec![context("prod", true)]);
        app.store_mut().activate_context("prod");
        app.store_mut().set_namespaces(vec![namespace("default")]);
        app.store_mut().show_namespace("default");
        app.store_mut()
            .set_pods("default", vec![pod_with_port("default", "web-1", 8080)]);
        app
    }

    #[test]
    fn toggle_on_namespace_pane_emits_toggle_command() {
        let mut app = app_with_pod();
        let cmd = app.apply_action(Action::ToggleSelected);
        assert_eq!(
            cmd,
            AppCommand::ToggleNamespace {
                name: "default".to_string()
            }
        );
    }

    #[test]
    fn toggle_on_pod_pane_starts_forward_with_matching_local_port() {
        let mut app = app_with_pod();
        app.apply_action(Action::ToggleFocus);
        assert_eq!(app.focus(), FocusPane::Pods);

        let cmd = app.apply_action(Action::ToggleSelected);
        assert_eq!(
            cmd,
            AppCommand::StartPortForward {
                namespace: "default".to_string(),
                pod: "web-1".to_string(),
                remote_port: 8080,
                local_port: 8080,
            }
        );
    }

    #[test]
    fn toggle_on_forwarded_row_emits_stop() {
        let mut app = app_with_pod();
        app.store_mut()
            .record_tunnel_start(TunnelConfig {
                key: TunnelKey {
                    context: "prod".to_string(),
                    namespace: "default".to_string(),
                    pod: "web-1".to_string(),
                    remote_port: 8080,
                },
                local_port: 8080,
                pid: 100,
                active: true,
            })
            .unwrap();
        app.apply_action(Action::ToggleFocus);

        let cmd = app.apply_action(Action::ToggleSelected);
        assert_eq!(
            cmd,
            AppCommand::StopPortForward {
                namespace: "default".to_string(),
                pod: "web-1".to_string(),
                remote_port: 8080,
            }
        );
    }

    #[test]
    fn local_port_prompt_collects_digits_and_submits() {
        let mut app = app_with_pod();
        app.apply_action(Action::ToggleFocus);
        app.apply_action(Action::StartForwardPrompt);
        assert_eq!(app.mode(), InputMode::LocalPort);

        for c in "9090".chars() {
            app.apply_action(Action::InputChar(c));
        }
        let cmd = app.apply_action(Action::SubmitInput);
        assert_eq!(
            cmd,
            AppCommand::StartPortForward {
                namespace: "default".to_string(),
                pod: "web-1".to_string(),
                remote_port: 8080,
                local_port: 9090,
            }
        );
        assert_eq!(app.mode(), InputMode::Normal);
    }

    #[test]
    fn empty_local_port_entry_defaults_to_remote_port() {
        let mut app = app_with_pod();
        app.apply_action(Action::ToggleFocus);
        app.apply_action(Action::StartForwardPrompt);

        let cmd = app.apply_action(Action::SubmitInput);
        assert_eq!(
            cmd,
            AppCommand::StartPortForward {
                namespace: "default".to_string(),
                pod: "web-1".to_string(),
                remote_port: 8080,
                local_port: 8080,
            }
        );
    }

    #[test]
    fn non_numeric_input_is_ignored_by_port_prompt() {
        let mut app = app_with_pod();
        app.apply_action(Action::ToggleFocus);
        app.apply_action(Action::StartForwardPrompt);

        app.apply_action(Action::InputChar('x'));
        assert_eq!(app.input(), "");
        app.apply_action(Action::InputChar('8'));
        assert_eq!(app.input(), "8");
    }

    #[test]
    fn retry_re_emits_the_failed_command_and_clears_the_error() {
        let mut app = app_with_pod();
        app.set_error("namespace fetch failed", AppCommand::Refresh);

        let cmd = app.apply_action(Action::Retry);
        assert_eq!(cmd, AppCommand::Refresh);
        assert!(app.error().is_none());

        let cmd = app.apply_action(Action::Retry);
        assert_eq!(cmd, AppCommand::None);
    }

    #[test]
    fn context_navigation_emits_activation_for_neighbors() {
        let mut app = App::new(BTreeSet::new());
        app.store_mut()
            .set_contexts(vec![context("prod", true), context("staging", false)]);
        app.store_mut().activate_context("prod");

        assert_eq!(
            app.apply_action(Action::NextContext),
            AppCommand::ActivateContext {
                context: "staging".to_string()
            }
        );
        assert_eq!(app.apply_action(Action::PrevContext), AppCommand::None);
    }

    #[test]
    fn pod_rows_flatten_ports_and_keep_portless_pods() {
        let mut app = app_with_pod();
        let mut pod = pod_with_port("default", "multi", 80);
        pod.ports.push(ContainerPort {
            name: None,
            port: 443,
            protocol: "TCP".to_string(),
        });
        let portless = PodInfo {
            name: "bare".to_string(),
            namespace: "default".to_string(),
            status: "Running".to_string(),
            created: None,
            ports: Vec::new(),
        };
        app.store_mut().set_pods(
            "default",
            vec![pod, portless, pod_with_port("default", "web-1", 8080)],
        );

        let rows = app.pod_rows();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].remote_port, Some(80));
        assert_eq!(rows[1].remote_port, Some(443));
        assert_eq!(rows[2].remote_port, None);
        assert_eq!(rows[3].remote_port, Some(8080));
    }
}
