use crate::app::InputMode;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    Down,
    Up,
    ToggleFocus,
    NextContext,
    PrevContext,
    Refresh,
    ToggleSelected,
    SelectAll,
    SelectOnly,
    DeselectAll,
    StartForwardPrompt,
    Retry,
    ClearMessage,
    SubmitInput,
    CancelInput,
    Backspace,
    InputChar(char),
}

pub fn map_key(mode: InputMode, key: KeyEvent) -> Option<Action> {
    match mode {
        InputMode::Normal => map_normal_mode_key(key),
        InputMode::LocalPort => map_port_input_key(key),
    }
}

fn map_normal_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('j') if key.modifiers.is_empty() => Some(Action::Down),
        KeyCode::Down => Some(Action::Down),
        KeyCode::Char('k') if key.modifiers.is_empty() => Some(Action::Up),
        KeyCode::Up => Some(Action::Up),
        KeyCode::Left | KeyCode::Char('h') => Some(Action::PrevContext),
        KeyCode::Right | KeyCode::Char('l') => Some(Action::NextContext),
        KeyCode::Tab => Some(Action::ToggleFocus),
        KeyCode::Char(' ') | KeyCode::Enter => Some(Action::ToggleSelected),
        KeyCode::Char('r') | KeyCode::F(5) => Some(Action::Refresh),
        KeyCode::Char('a') => Some(Action::SelectAll),
        KeyCode::Char('o') => Some(Action::SelectOnly),
        KeyCode::Char('d') if key.modifiers.is_empty() => Some(Action::DeselectAll),
        KeyCode::Char('p') => Some(Action::StartForwardPrompt),
        KeyCode::Char('y') => Some(Action::Retry),
        KeyCode::Esc => Some(Action::ClearMessage),
        _ => None,
    }
}

fn map_port_input_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Esc => Some(Action::CancelInput),
        KeyCode::Enter => Some(Action::SubmitInput),
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::Char(c) if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT => {
            Some(Action::InputChar(c))
        }
        _ => None,
    }
}
