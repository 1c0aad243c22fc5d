use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap};

use crate::app::{App, FocusPane, InputMode, PodRow};
use crate::model::NamespacePhase;

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const HIGHLIGHT: Color = Color::Rgb(24, 36, 58);

pub fn render(frame: &mut Frame, app: &App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app);
    render_body(frame, root[1], app);
    render_footer(frame, root[2], app);

    if app.mode() == InputMode::LocalPort {
        render_port_modal(frame, app);
    }
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = vec![
        Span::styled(
            " portside ",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
    ];

    let active = app.store().active_context();
    for context in app.store().contexts() {
        let is_active = Some(context.name.as_str()) == active;
        let style = if is_active {
            Style::default()
                .fg(Color::Black)
                .bg(ACCENT)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(MUTED)
        };
        spans.push(Span::styled(format!(" {} ", context.name), style));
        spans.push(Span::raw(" "));
    }

    if let Some(context) = app
        .store()
        .contexts()
        .iter()
        .find(|context| Some(context.name.as_str()) == active)
    {
        spans.push(Span::styled(
            format!(" {}@{}", context.auth_info, context.cluster),
            Style::default().fg(MUTED),
        ));
    }

    let tunnels = app.store().tunnel_count();
    if tunnels > 0 {
        spans.push(Span::styled(
            format!("  {tunnels} active"),
            Style::default().fg(WARN),
        ));
    }

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG).fg(Color::White)),
        area,
    );
}

fn render_body(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(34), Constraint::Min(30)])
        .split(area);

    render_namespaces(frame, chunks[0], app);
    render_pods(frame, chunks[1], app);
}

fn render_namespaces(frame: &mut Frame, area: Rect, app: &App) {
    let focused = app.focus() == FocusPane::Namespaces;
    let namespaces = app.store().namespaces();

    let rows = namespaces.iter().map(|namespace| {
        let mark = if app.store().is_visible(&namespace.name) {
            "[x]"
        } else {
            "[ ]"
        };
        let phase_style = match namespace.phase {
            NamespacePhase::Active => Style::default().fg(ACCENT),
            NamespacePhase::Terminating => Style::default().fg(WARN),
            NamespacePhase::Unknown => Style::default().fg(MUTED),
        };
        Row::new(vec![
            Cell::from(mark).style(Style::default().fg(Color::White)),
            Cell::from(namespace.name.clone()).style(Style::default().fg(Color::White)),
            Cell::from(namespace.phase.label()).style(phase_style),
            Cell::from(namespace.age()).style(Style::default().fg(MUTED)),
        ])
    });

    let block = Block::default()
        .title(format!("Namespaces ({})", namespaces.len()))
        .borders(Borders::ALL)
        .border_style(if focused {
            Style::default().fg(ACCENT)
        } else {
            Style::default().fg(MUTED)
        })
        .style(Style::default().bg(PANEL));

    let table = Table::new(
        rows,
        vec![
            Constraint::Length(3),
            Constraint::Min(12),
            Constraint::Length(11),
            Constraint::Length(7),
        ],
    )
    .block(block)
    .column_spacing(1)
    .row_highlight_style(
        Style::default()
            .bg(HIGHLIGHT)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("> ");

    let mut state = TableState::default();
    if !namespaces.is_empty() {
        state.select(Some(app.namespace_index()));
    }
    frame.render_stateful_widget(table, area, &mut state);
}

fn render_pods(frame: &mut Frame, area: Rect, app: &App) {
    let focused = app.focus() == FocusPane::Pods;
    let pod_rows = app.pod_rows();

    let headers = ["Namespace", "Pod", "Status", "Age", "Port", "Proto", "Forward"];
    let header_row = Row::new(headers.iter().map(|header| {
        Cell::from(*header).style(Style::default().add_modifier(Modifier::BOLD))
    }))
    .height(1)
    .style(Style::default().fg(ACCENT));

    let rows = pod_rows.iter().map(|row| {
        let forward = forward_cell(app, row);
        Row::new(vec![
            Cell::from(row.namespace.clone()).style(Style::default().fg(MUTED)),
            Cell::from(row.pod.clone()).style(Style::default().fg(Color::White)),
            Cell::from(row.status.clone()).style(status_style(&row.status)),
            Cell::from(row.age.clone()).style(Style::default().fg(MUTED)),
            Cell::from(port_cell(row)).style(Style::default().fg(Color::White)),
            Cell::from(row.protocol.clone().unwrap_or_default())
                .style(Style::default().fg(MUTED)),
            forward,
        ])
    });

    let block = Block::default()
        .title(format!("Pods ({})", pod_rows.len()))
        .borders(Borders::ALL)
        .border_style(if focused {
            Style::default().fg(ACCENT)
        } else {
            Style::default().fg(MUTED)
        })
        .style(Style::default().bg(PANEL));

    let table = Table::new(
        rows,
        vec![
            Constraint::Length(16),
            Constraint::Min(18),
            Constraint::Length(12),
            Constraint::Length(7),
            Constraint::Length(11),
            Constraint::Length(5),
            Constraint::Length(18),
        ],
    )
    .header(header_row)
    .block(block)
    .column_spacing(1)
    .row_highlight_style(
        Style::default()
            .bg(HIGHLIGHT)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("> ");

    let mut state = TableState::default();
    if !pod_rows.is_empty() {
        state.select(Some(app.pod_index()));
    }
    frame.render_stateful_widget(table, area, &mut state);
}

fn port_cell(row: &PodRow) -> String {
    match (row.remote_port, row.port_name.as_deref()) {
        (Some(port), Some(name)) => format!("{port} {name}"),
        (Some(port), None) => port.to_string(),
        (None, _) => "-".to_string(),
    }
}

fn forward_cell<'a>(app: &App, row: &PodRow) -> Cell<'a> {
    match app.tunnel_for_row(row) {
        Some(tunnel) => Cell::from(format!(
            "{}→{} [{}]",
            tunnel.local_port, tunnel.key.remote_port, tunnel.pid
        ))
        .style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)),
        None => Cell::from("-").style(Style::default().fg(MUTED)),
    }
}

fn status_style(status: &str) -> Style {
    match status {
        "Running" | "Succeeded" => Style::default().fg(ACCENT),
        "Pending" | "Terminating" => Style::default().fg(WARN),
        "Failed" | "CrashLoopBackOff" | "Error" => Style::default().fg(ERROR),
        _ => Style::default().fg(Color::White),
    }
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    let line = match app.error() {
        Some(error) => Line::from(vec![
            Span::styled(
                format!(" {} ", error.message),
                Style::default().fg(ERROR).add_modifier(Modifier::BOLD),
            ),
            Span::styled("y retry  Esc dismiss", Style::default().fg(MUTED)),
        ]),
        None => {
            let refreshed = app
                .refreshed_at()
                .map(|at| format!("  refreshed {}", at.format("%H:%M:%S")))
                .unwrap_or_default();
            Line::from(vec![
                Span::styled(
                    format!(" {}{refreshed} ", app.status()),
                    Style::default().fg(Color::White),
                ),
                Span::styled(
                    "q quit  Tab pane  Space toggle  p port  a/o/d select  r refresh  h/l context",
                    Style::default().fg(MUTED),
                ),
            ])
        }
    };
    frame.render_widget(Paragraph::new(line).style(Style::default().bg(BG)), area);
}

fn render_port_modal(frame: &mut Frame, app: &App) {
    let area = centered_rect(44, 22, frame.area());
    frame.render_widget(Clear, area);

    let target = app
        .pending_forward()
        .map(|(namespace, pod, remote_port)| format!("{namespace}/{pod} port {remote_port}"))
        .unwrap_or_default();
    let lines = vec![
        Line::from(format!("Forward {target}")),
        Line::from(""),
        Line::from(vec![
            Span::raw("Local port: "),
            Span::styled(
                format!("{}_", app.input()),
                Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            "Enter confirm (empty = same port)  Esc cancel",
            Style::default().fg(MUTED),
        )),
    ];

    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title("Port-forward")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White));

    frame.render_widget(modal, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
