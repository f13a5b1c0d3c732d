//! Key chords such as `"Control+Shift+A"`.
//!
//! Every key but the last is held in order, the last is pressed and released,
//! then the held keys are released in reverse order.

use crate::error::{BrowserError, KeyError};
use crate::hands::BrowserSession;

/// Maps a lower-cased token to the DOM `KeyboardEvent.key` name.
fn alias(token: &str) -> Option<&'static str> {
    let key = match token {
        "control" | "ctrl" => "Control",
        "shift" => "Shift",
        "alt" | "option" => "Alt",
        "command" | "cmd" | "meta" | "super" => "Meta",
        "enter" | "return" => "Enter",
        "tab" => "Tab",
        "backspace" => "Backspace",
        "delete" | "del" => "Delete",
        "escape" | "esc" => "Escape",
        "insert" => "Insert",
        "space" => " ",
        "pageup" => "PageUp",
        "pagedown" => "PageDown",
        "home" => "Home",
        "end" => "End",
        "left" | "arrowleft" => "ArrowLeft",
        "right" | "arrowright" => "ArrowRight",
        "up" | "arrowup" => "ArrowUp",
        "down" | "arrowdown" => "ArrowDown",
        "f1" => "F1",
        "f2" => "F2",
        "f3" => "F3",
        "f4" => "F4",
        "f5" => "F5",
        "f6" => "F6",
        "f7" => "F7",
        "f8" => "F8",
        "f9" => "F9",
        "f10" => "F10",
        "f11" => "F11",
        "f12" => "F12",
        "plus" => "+",
        "minus" => "-",
        "equal" | "equals" => "=",
        "comma" => ",",
        "period" => ".",
        "slash" => "/",
        "backslash" => "\\",
        "semicolon" => ";",
        "quote" => "'",
        "backquote" => "`",
        "bracketleft" => "[",
        "bracketright" => "]",
        _ => return None,
    };
    Some(key)
}

/// Resolves one token through the alias table, falling back to the token itself.
pub fn resolve_key(token: &str) -> String {
    alias(&token.to_lowercase())
        .map(str::to_string)
        .unwrap_or_else(|| token.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    Down(String),
    Press(String),
    Up(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    held: Vec<String>,
    key: String,
}

impl KeyChord {
    pub fn parse(chord: &str) -> Result<Self, KeyError> {
        if chord.is_empty() {
            return Err(KeyError::Empty);
        }
        let mut keys = Vec::new();
        for token in chord.split('+') {
            if token.is_empty() {
                return Err(KeyError::EmptyKey(chord.to_string()));
            }
            keys.push(resolve_key(token));
        }
        // split always yields at least one token
        let key = keys.pop().ok_or(KeyError::Empty)?;
        Ok(Self { held: keys, key })
    }

    pub fn events(&self) -> Vec<KeyEvent> {
        let mut events = Vec::with_capacity(self.held.len() * 2 + 1);
        events.extend(self.held.iter().cloned().map(KeyEvent::Down));
        events.push(KeyEvent::Press(self.key.clone()));
        events.extend(self.held.iter().rev().cloned().map(KeyEvent::Up));
        events
    }

    /// Dispatches the chord. Held keys are released even if the final press fails.
    pub async fn dispatch(&self, session: &dyn BrowserSession) -> Result<(), BrowserError> {
        let mut pressed = 0;
        let mut outcome = Ok(());
        for key in &self.held {
            if let Err(err) = session.key_down(key).await {
                outcome = Err(err);
                break;
            }
            pressed += 1;
        }
        if outcome.is_ok() {
            outcome = session.key_press(&self.key).await;
        }
        for key in self.held[..pressed].iter().rev() {
            let released = session.key_up(key).await;
            if outcome.is_ok() {
                outcome = released;
            }
        }
        outcome
    }
}

impl std::fmt::Display for KeyChord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for key in &self.held {
            write!(f, "{key}+")?;
        }
        write!(f, "{}", self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_are_case_insensitive() {
        assert_eq!(resolve_key("control"), "Control");
        assert_eq!(resolve_key("CONTROL"), "Control");
        assert_eq!(resolve_key("Return"), "Enter");
        assert_eq!(resolve_key("command"), "Meta");
        assert_eq!(resolve_key("meta"), "Meta");
        assert_eq!(resolve_key("f11"), "F11");
        assert_eq!(resolve_key("Left"), "ArrowLeft");
        assert_eq!(resolve_key("pagedown"), "PageDown");
    }

    #[test]
    fn unmapped_tokens_pass_through_unchanged() {
        assert_eq!(resolve_key("A"), "A");
        assert_eq!(resolve_key("a"), "a");
        assert_eq!(resolve_key("MediaPlayPause"), "MediaPlayPause");
    }

    #[test]
    fn chord_releases_in_reverse_hold_order() {
        let chord = KeyChord::parse("Control+Shift+A").unwrap();
        assert_eq!(
            chord.events(),
            vec![
                KeyEvent::Down("Control".into()),
                KeyEvent::Down("Shift".into()),
                KeyEvent::Press("A".into()),
                KeyEvent::Up("Shift".into()),
                KeyEvent::Up("Control".into()),
            ]
        );
    }

    #[test]
    fn single_key_is_a_plain_press() {
        let chord = KeyChord::parse("enter").unwrap();
        assert_eq!(chord.events(), vec![KeyEvent::Press("Enter".into())]);
        assert_eq!(chord.to_string(), "Enter");
    }

    #[test]
    fn empty_tokens_are_rejected() {
        assert_eq!(KeyChord::parse(""), Err(KeyError::Empty));
        assert_eq!(
            KeyChord::parse("Control+"),
            Err(KeyError::EmptyKey("Control+".into()))
        );
    }
}
