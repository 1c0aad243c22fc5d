mod app;
mod cli;
mod config;
mod error;
mod forward;
mod input;
mod kubectl;
mod model;
mod orchestrator;
mod store;
mod ui;

use anyhow::{Context, Result};
use app::{App, AppCommand};
use clap::Parser;
use cli::CliArgs;
use config::Settings;
use crossterm::event::{
    Event, EventStream, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use forward::{ForwardExitEvent, ForwardSupervisor};
use futures::StreamExt;
use kubectl::{ClusterClient, KubectlClient};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::io::{self, Stdout};
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter)?;

    let settings = Settings::load()?;
    let kubectl_bin = args
        .kubectl_bin
        .clone()
        .or_else(|| settings.kubectl_bin.clone())
        .unwrap_or_else(|| "kubectl".to_string());

    let client = KubectlClient::new(kubectl_bin.as_str());
    let mut app = App::new(settings.allowed_namespaces.clone());

    run(&mut app, &client, &kubectl_bin, &args).await
}

fn init_tracing(level_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::sink)
        .try_init();

    Ok(())
}

async fn run(
    app: &mut App,
    client: &KubectlClient,
    kubectl_bin: &str,
    args: &CliArgs,
) -> Result<()> {
    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = run_loop(&mut terminal, app, client, kubectl_bin, args).await;
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_ALL_KEYS_AS_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_ALTERNATE_KEYS
                    | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
            )
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut App,
    client: &KubectlClient,
    kubectl_bin: &str,
    args: &CliArgs,
) -> Result<()> {
    let (pf_tx, mut pf_rx) = mpsc::unbounded_channel::<ForwardExitEvent>();
    let mut supervisor = ForwardSupervisor::new(kubectl_bin, pf_tx);

    bootstrap(app, client, args.context.as_deref()).await;
    if let Some(namespace) = args.namespace.as_deref()
        && app.store().active_context().is_some()
    {
        orchestrator::select_only(app, client, namespace).await;
    }

    let mut reader = EventStream::new();

    loop {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if !app.running() {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if let Some(action) = input::map_key(app.mode(), key) {
                            debug!("action={action:?}");
                            let command = app.apply_action(action);
                            terminal
                                .draw(|frame| ui::render(frame, app))
                                .context("failed to render terminal frame")?;
                            execute_app_command(app, client, &mut supervisor, command).await;
                        }
                    }
                    Some(Ok(Event::Resize(_, _))) => {}
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.set_status(format!("terminal event error: {error}"));
                    }
                    None => {
                        app.set_status("terminal event stream closed");
                        break;
                    }
                }
            }
            maybe_event = pf_rx.recv() => {
                if let Some(event) = maybe_event {
                    orchestrator::handle_forward_exit(app, &mut supervisor, event);
                }
            }
        }
    }

    supervisor.shutdown();
    Ok(())
}

/// Initial load: the context catalog, then either the context requested on
/// the command line or the one kubectl marks as current.
async fn bootstrap(app: &mut App, client: &impl ClusterClient, startup_context: Option<&str>) {
    match startup_context {
        Some(context) => match client.list_contexts().await {
            Ok(contexts) => {
                app.store_mut().set_contexts(contexts);
                orchestrator::activate_context(app, client, context).await;
            }
            Err(error) => {
                app.set_error(
                    format!("Failed to load contexts: {error}"),
                    AppCommand::LoadContexts,
                );
            }
        },
        None => orchestrator::load_contexts(app, client).await,
    }
}

async fn execute_app_command(
    app: &mut App,
    client: &impl ClusterClient,
    supervisor: &mut ForwardSupervisor,
    command: AppCommand,
) {
    match command {
        AppCommand::None => {}
        AppCommand::LoadContexts => orchestrator::load_contexts(app, client).await,
        AppCommand::ActivateContext { context } => {
            orchestrator::activate_context(app, client, &context).await;
        }
        AppCommand::Refresh => orchestrator::refresh(app, client).await,
        AppCommand::ToggleNamespace { name } => {
            orchestrator::toggle_namespace(app, client, &name).await;
        }
        AppCommand::SelectAllNamespaces => orchestrator::select_all(app, client).await,
        AppCommand::SelectOnlyNamespace { name } => {
            orchestrator::select_only(app, client, &name).await;
        }
        AppCommand::DeselectAllNamespaces => orchestrator::deselect_all(app),
        AppCommand::StartPortForward {
            namespace,
            pod,
            remote_port,
            local_port,
        } => {
            orchestrator::start_port_forward(
                app,
                supervisor,
                &namespace,
                &pod,
                remote_port,
                local_port,
            )
            .await;
        }
        AppCommand::StopPortForward {
            namespace,
            pod,
            remote_port,
        } => {
            orchestrator::stop_port_forward(app, supervisor, &namespace, &pod, remote_port).await;
        }
    }
}
