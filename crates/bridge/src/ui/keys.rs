//! Key event translation.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::prompt::FormKey;

/// `Ctrl+]` closes the session, like telnet's escape character.
pub fn is_close_chord(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char(']')
}

/// Key releases and repeats reported by some terminals are not input.
pub fn is_press(key: &KeyEvent) -> bool {
    key.kind == KeyEventKind::Press
}

/// Bytes a terminal would send for this key.
pub fn encode_key(key: &KeyEvent) -> Option<String> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    let seq = match key.code {
        KeyCode::Char(c) if ctrl => control_char(c)?.to_string(),
        KeyCode::Char(c) if alt => format!("\x1b{}", c),
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Enter => "\r".to_string(),
        KeyCode::Backspace => "\x7f".to_string(),
        KeyCode::Tab => "\t".to_string(),
        KeyCode::BackTab => "\x1b[Z".to_string(),
        KeyCode::Esc => "\x1b".to_string(),
        KeyCode::Up => "\x1b[A".to_string(),
        KeyCode::Down => "\x1b[B".to_string(),
        KeyCode::Right => "\x1b[C".to_string(),
        KeyCode::Left => "\x1b[D".to_string(),
        KeyCode::Home => "\x1b[H".to_string(),
        KeyCode::End => "\x1b[F".to_string(),
        KeyCode::Insert => "\x1b[2~".to_string(),
        KeyCode::Delete => "\x1b[3~".to_string(),
        KeyCode::PageUp => "\x1b[5~".to_string(),
        KeyCode::PageDown => "\x1b[6~".to_string(),
        KeyCode::F(n) => function_key(n)?.to_string(),
        _ => return None,
    };
    Some(seq)
}

fn control_char(c: char) -> Option<char> {
    let byte = match c {
        'a'..='z' => c as u8 - b'a' + 1,
        'A'..='Z' => c as u8 - b'A' + 1,
        ' ' | '@' | '2' => 0,
        '[' | '3' => 0x1b,
        '\\' | '4' => 0x1c,
        ']' | '5' => 0x1d,
        '^' | '6' => 0x1e,
        '_' | '7' => 0x1f,
        _ => return None,
    };
    Some(byte as char)
}

fn function_key(n: u8) -> Option<&'static str> {
    let seq = match n {
        1 => "\x1bOP",
        2 => "\x1bOQ",
        3 => "\x1bOR",
        4 => "\x1bOS",
        5 => "\x1b[15~",
        6 => "\x1b[17~",
        7 => "\x1b[18~",
        8 => "\x1b[19~",
        9 => "\x1b[20~",
        10 => "\x1b[21~",
        11 => "\x1b[23~",
        12 => "\x1b[24~",
        _ => return None,
    };
    Some(seq)
}

/// Map a key to the credential form.
pub fn form_key(key: &KeyEvent) -> Option<FormKey> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('c') if ctrl => Some(FormKey::Escape),
        KeyCode::Char(_) if ctrl => None,
        KeyCode::Char(c) => Some(FormKey::Char(c)),
        KeyCode::Backspace => Some(FormKey::Backspace),
        KeyCode::Tab | KeyCode::BackTab => Some(FormKey::Tab),
        KeyCode::Enter => Some(FormKey::Enter),
        KeyCode::Esc => Some(FormKey::Escape),
        _ => None,
    }
}

/// Choices offered once a session has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    /// Open the same target again, reusing a cached credential.
    Reconnect,
    /// Drop the cached credential for the target.
    ForgetCredential,
    ClearScreen,
    Quit,
}

/// Map a key to the end-of-session menu.
pub fn menu_action(key: &KeyEvent) -> Option<MenuAction> {
    if is_close_chord(key) {
        return Some(MenuAction::Quit);
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('l') if ctrl => Some(MenuAction::ClearScreen),
        KeyCode::Char('c') | KeyCode::Char('d') if ctrl => Some(MenuAction::Quit),
        KeyCode::Char(_) if ctrl => None,
        KeyCode::Char('r') | KeyCode::Enter => Some(MenuAction::Reconnect),
        KeyCode::Char('f') => Some(MenuAction::ForgetCredential),
        KeyCode::Char('c') => Some(MenuAction::ClearScreen),
        KeyCode::Char('q') | KeyCode::Esc => Some(MenuAction::Quit),
        _ => None,
    }
}
