//! Keyboard mapping for the run view

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// What a key press asks the run view to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Abort a running run, or close the view once done
    Abort,
    ScrollUp,
    ScrollDown,
    PageUp,
    PageDown,
    Top,
    /// Jump to the bottom and follow new output
    Bottom,
    CycleFilter,
    CycleVerbosity,
}

/// Map a key event; `None` for keys the view ignores
pub fn key_action(key: KeyEvent) -> Option<KeyAction> {
    if key.kind == KeyEventKind::Release {
        return None;
    }

    let action = match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => KeyAction::Abort,
        KeyCode::Char('q') | KeyCode::Esc => KeyAction::Abort,

        KeyCode::Up | KeyCode::Char('k') => KeyAction::ScrollUp,
        KeyCode::Down | KeyCode::Char('j') => KeyAction::ScrollDown,
        KeyCode::PageUp => KeyAction::PageUp,
        KeyCode::PageDown => KeyAction::PageDown,
        KeyCode::Home | KeyCode::Char('g') => KeyAction::Top,
        KeyCode::End | KeyCode::Char('G') => KeyAction::Bottom,

        KeyCode::Tab => KeyAction::CycleFilter,
        KeyCode::Char('v') => KeyAction::CycleVerbosity,

        _ => return None,
    };

    Some(action)
}
