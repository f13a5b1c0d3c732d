use serde_json::Value;

use crate::coords::NORMALIZED_MAX;
use crate::error::ActionError;
use crate::types::Args;

pub const DEFAULT_SCROLL_MAGNITUDE: u32 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn is_vertical(self) -> bool {
        matches!(self, ScrollDirection::Up | ScrollDirection::Down)
    }

    /// Signed `(dx, dy)` for a scroll of `amount` pixels.
    pub fn delta(self, amount: u32) -> (i64, i64) {
        let amount = i64::from(amount);
        match self {
            ScrollDirection::Up => (0, -amount),
            ScrollDirection::Down => (0, amount),
            ScrollDirection::Left => (-amount, 0),
            ScrollDirection::Right => (amount, 0),
        }
    }
}

/// The model's action vocabulary. Coordinates are normalized (`0..=999`).
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenWebBrowser,
    ClickAt {
        x: u32,
        y: u32,
    },
    HoverAt {
        x: u32,
        y: u32,
    },
    TypeTextAt {
        x: u32,
        y: u32,
        text: String,
        clear_before_typing: bool,
        press_enter: bool,
    },
    ScrollDocument {
        direction: ScrollDirection,
    },
    ScrollAt {
        x: u32,
        y: u32,
        direction: ScrollDirection,
        magnitude: u32,
    },
    Navigate {
        url: String,
    },
    Search,
    GoBack,
    GoForward,
    Wait5Seconds,
    KeyCombination {
        keys: String,
    },
    DragAndDrop {
        x: u32,
        y: u32,
        destination_x: u32,
        destination_y: u32,
    },
    /// A name outside the known vocabulary; executes as a no-op.
    Unrecognized {
        name: String,
    },
}

impl Action {
    pub fn parse(name: &str, args: &Args) -> Result<Self, ActionError> {
        let action = match name {
            "open_web_browser" => Action::OpenWebBrowser,
            "click_at" => {
                let a = ArgReader::new("click_at", args);
                Action::ClickAt {
                    x: a.coord("x")?,
                    y: a.coord("y")?,
                }
            }
            "hover_at" => {
                let a = ArgReader::new("hover_at", args);
                Action::HoverAt {
                    x: a.coord("x")?,
                    y: a.coord("y")?,
                }
            }
            "type_text_at" => {
                let a = ArgReader::new("type_text_at", args);
                Action::TypeTextAt {
                    x: a.coord("x")?,
                    y: a.coord("y")?,
                    text: a.string("text")?,
                    clear_before_typing: a.flag("clear_before_typing", true)?,
                    press_enter: a.flag("press_enter", false)?,
                }
            }
            "scroll_document" => {
                let a = ArgReader::new("scroll_document", args);
                Action::ScrollDocument {
                    direction: a.direction("direction")?,
                }
            }
            "scroll_at" => {
                let a = ArgReader::new("scroll_at", args);
                Action::ScrollAt {
                    x: a.coord("x")?,
                    y: a.coord("y")?,
                    direction: a.direction("direction")?,
                    magnitude: a.magnitude("magnitude")?,
                }
            }
            "navigate" => Action::Navigate {
                url: ArgReader::new("navigate", args).string("url")?,
            },
            "search" => Action::Search,
            "go_back" => Action::GoBack,
            "go_forward" => Action::GoForward,
            "wait_5_seconds" => Action::Wait5Seconds,
            "key_combination" => Action::KeyCombination {
                keys: ArgReader::new("key_combination", args).string("keys")?,
            },
            "drag_and_drop" => {
                let a = ArgReader::new("drag_and_drop", args);
                Action::DragAndDrop {
                    x: a.coord("x")?,
                    y: a.coord("y")?,
                    destination_x: a.coord("destination_x")?,
                    destination_y: a.coord("destination_y")?,
                }
            }
            other => Action::Unrecognized {
                name: other.to_string(),
            },
        };
        Ok(action)
    }

    pub fn name(&self) -> &str {
        match self {
            Action::OpenWebBrowser => "open_web_browser",
            Action::ClickAt { .. } => "click_at",
            Action::HoverAt { .. } => "hover_at",
            Action::TypeTextAt { .. } => "type_text_at",
            Action::ScrollDocument { .. } => "scroll_document",
            Action::ScrollAt { .. } => "scroll_at",
            Action::Navigate { .. } => "navigate",
            Action::Search => "search",
            Action::GoBack => "go_back",
            Action::GoForward => "go_forward",
            Action::Wait5Seconds => "wait_5_seconds",
            Action::KeyCombination { .. } => "key_combination",
            Action::DragAndDrop { .. } => "drag_and_drop",
            Action::Unrecognized { name } => name,
        }
    }
}

struct ArgReader<'a> {
    action: &'static str,
    args: &'a Args,
}

impl<'a> ArgReader<'a> {
    fn new(action: &'static str, args: &'a Args) -> Self {
        Self { action, args }
    }

    fn required(&self, argument: &'static str) -> Result<&'a Value, ActionError> {
        match self.args.get(argument) {
            Some(Value::Null) | None => Err(ActionError::MissingArgument {
                action: self.action,
                argument,
            }),
            Some(value) => Ok(value),
        }
    }

    fn invalid(&self, argument: &'static str, value: &Value) -> ActionError {
        ActionError::InvalidArgument {
            action: self.action,
            argument,
            value: value.to_string(),
        }
    }

    fn number(&self, argument: &'static str, value: &Value) -> Result<i64, ActionError> {
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| self.invalid(argument, value))
    }

    /// Normalized coordinate, clamped into `0..=999`.
    fn coord(&self, argument: &'static str) -> Result<u32, ActionError> {
        let value = self.required(argument)?;
        let n = self.number(argument, value)?;
        Ok(n.clamp(0, i64::from(NORMALIZED_MAX)) as u32)
    }

    fn magnitude(&self, argument: &'static str) -> Result<u32, ActionError> {
        match self.args.get(argument) {
            Some(Value::Null) | None => Ok(DEFAULT_SCROLL_MAGNITUDE),
            Some(value) => {
                let n = self.number(argument, value)?;
                u32::try_from(n).map_err(|_| self.invalid(argument, value))
            }
        }
    }

    fn string(&self, argument: &'static str) -> Result<String, ActionError> {
        let value = self.required(argument)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.invalid(argument, value))
    }

    fn flag(&self, argument: &'static str, default: bool) -> Result<bool, ActionError> {
        match self.args.get(argument) {
            Some(Value::Null) | None => Ok(default),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(value) => Err(self.invalid(argument, value)),
        }
    }

    fn direction(&self, argument: &'static str) -> Result<ScrollDirection, ActionError> {
        let value = self.required(argument)?;
        match value.as_str().map(str::to_lowercase).as_deref() {
            Some("up") => Ok(ScrollDirection::Up),
            Some("down") => Ok(ScrollDirection::Down),
            Some("left") => Ok(ScrollDirection::Left),
            Some("right") => Ok(ScrollDirection::Right),
            _ => Err(self.invalid(argument, value)),
        }
    }
}
