//! Normalized key presses.
//!
//! Key-binding tables store browser-style key names (`"j"`, `"G"`, `"Enter"`,
//! `"Escape"`, `" "`), so terminal events are translated into the same
//! vocabulary before they reach the modal stack or the navigator.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPress {
    pub key: String,
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
}

impl KeyPress {
    /// A printable key. Uppercase letters imply shift, as they do for a
    /// browser `keydown` event.
    pub fn char(ch: char) -> Self {
        Self {
            key: ch.to_string(),
            shift: ch.is_uppercase(),
            ctrl: false,
            alt: false,
        }
    }

    pub fn named(name: &str) -> Self {
        Self {
            key: name.to_string(),
            shift: false,
            ctrl: false,
            alt: false,
        }
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn from_event(event: &KeyEvent) -> Option<Self> {
        if event.kind != KeyEventKind::Press {
            return None;
        }
        let shift = event.modifiers.contains(KeyModifiers::SHIFT);
        let ctrl = event.modifiers.contains(KeyModifiers::CONTROL);
        let alt = event.modifiers.contains(KeyModifiers::ALT);

        let (key, implied_shift) = match event.code {
            KeyCode::Char(ch) => (ch.to_string(), ch.is_uppercase()),
            KeyCode::Enter => ("Enter".to_string(), false),
            KeyCode::Esc => ("Escape".to_string(), false),
            KeyCode::Tab => ("Tab".to_string(), false),
            KeyCode::BackTab => ("Tab".to_string(), true),
            KeyCode::Backspace => ("Backspace".to_string(), false),
            KeyCode::Delete => ("Delete".to_string(), false),
            KeyCode::Up => ("ArrowUp".to_string(), false),
            KeyCode::Down => ("ArrowDown".to_string(), false),
            KeyCode::Left => ("ArrowLeft".to_string(), false),
            KeyCode::Right => ("ArrowRight".to_string(), false),
            KeyCode::Home => ("Home".to_string(), false),
            KeyCode::End => ("End".to_string(), false),
            KeyCode::PageUp => ("PageUp".to_string(), false),
            KeyCode::PageDown => ("PageDown".to_string(), false),
            KeyCode::F(n) => (format!("F{n}"), false),
            _ => return None,
        };

        Some(Self {
            key,
            shift: shift || implied_shift,
            ctrl,
            alt,
        })
    }

    pub fn is(&self, key: &str) -> bool {
        self.key == key
    }

    /// True for a plain key with no ctrl/alt modifier.
    pub fn is_plain(&self, key: &str) -> bool {
        !self.ctrl && !self.alt && self.key == key
    }

    pub fn is_ctrl(&self, key: &str) -> bool {
        self.ctrl && self.key.eq_ignore_ascii_case(key)
    }

    /// The single character this press would type into a text field.
    pub fn text_char(&self) -> Option<char> {
        if self.ctrl || self.alt {
            return None;
        }
        let mut chars = self.key.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => Some(ch),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        let mut out = String::new();
        if self.ctrl {
            out.push_str("Ctrl-");
        }
        if self.alt {
            out.push_str("Alt-");
        }
        match self.key.as_str() {
            " " => out.push_str("Space"),
            other => out.push_str(other),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn uppercase_char_implies_shift() {
        let key = KeyPress::from_event(&event(KeyCode::Char('G'), KeyModifiers::NONE)).unwrap();
        assert_eq!(key.key, "G");
        assert!(key.shift);
    }

    #[test]
    fn named_keys_use_browser_names() {
        let esc = KeyPress::from_event(&event(KeyCode::Esc, KeyModifiers::NONE)).unwrap();
        assert_eq!(esc.key, "Escape");
        let back = KeyPress::from_event(&event(KeyCode::BackTab, KeyModifiers::NONE)).unwrap();
        assert_eq!(back.key, "Tab");
        assert!(back.shift);
    }

    #[test]
    fn ctrl_chords_keep_the_letter() {
        let key =
            KeyPress::from_event(&event(KeyCode::Char('k'), KeyModifiers::CONTROL)).unwrap();
        assert!(key.is_ctrl("k"));
        assert!(!key.is_plain("k"));
        assert_eq!(key.text_char(), None);
        assert_eq!(key.label(), "Ctrl-k");
    }

    #[test]
    fn space_is_typed_and_labelled() {
        let key = KeyPress::char(' ');
        assert_eq!(key.text_char(), Some(' '));
        assert_eq!(key.label(), "Space");
    }
}
