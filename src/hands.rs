use std::ffi::OsStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Input;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info, warn};

use crate::coords::{Pixel, Viewport};
use crate::error::BrowserError;
use crate::types::Screenshot;

/// The primitives the action executor drives. One session serves one task.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    fn viewport(&self) -> Viewport;

    async fn mouse_move(&self, at: Pixel) -> Result<(), BrowserError>;
    async fn mouse_down(&self, at: Pixel) -> Result<(), BrowserError>;
    async fn mouse_up(&self, at: Pixel) -> Result<(), BrowserError>;
    async fn click(&self, at: Pixel) -> Result<(), BrowserError>;
    async fn wheel(&self, at: Pixel, delta_x: i64, delta_y: i64) -> Result<(), BrowserError>;

    async fn key_down(&self, key: &str) -> Result<(), BrowserError>;
    async fn key_up(&self, key: &str) -> Result<(), BrowserError>;
    async fn key_press(&self, key: &str) -> Result<(), BrowserError>;
    async fn type_text(&self, text: &str) -> Result<(), BrowserError>;

    /// Page-level scroll by a pixel offset.
    async fn scroll_by(&self, delta_x: i64, delta_y: i64) -> Result<(), BrowserError>;
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;
    async fn go_back(&self) -> Result<(), BrowserError>;
    async fn go_forward(&self) -> Result<(), BrowserError>;

    /// Waits until no navigation is pending.
    async fn wait_for_load(&self) -> Result<(), BrowserError>;
    async fn screenshot(&self) -> Result<Screenshot, BrowserError>;
    async fn current_url(&self) -> Result<String, BrowserError>;
}

/// Provisions a fresh session for each task.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

static HARDENING_FLAGS: [&str; 7] = [
    "--disable-extensions",
    "--disable-file-system",
    "--disable-plugins",
    "--disable-dev-shm-usage",
    "--disable-background-networking",
    "--disable-default-apps",
    "--disable-sync",
];

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub viewport: Viewport,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
        }
    }
}

/// A Chrome instance with exactly one navigable tab.
pub struct ChromeSession {
    browser: Arc<Browser>,
    tab: Arc<Tab>,
    viewport: Viewport,
    /// CDP modifier bitmask of currently held keys.
    modifiers: Arc<AtomicU32>,
    /// Left button is down between `mouse_down` and `mouse_up`.
    left_held: Arc<AtomicBool>,
}

impl ChromeSession {
    /// Blocking; call from `spawn_blocking`.
    pub fn launch(options: &BrowserOptions) -> Result<Self, BrowserError> {
        let viewport = options.viewport;
        let launch = LaunchOptions {
            headless: options.headless,
            window_size: Some((viewport.width, viewport.height)),
            args: HARDENING_FLAGS.iter().map(|flag| OsStr::new(*flag)).collect(),
            idle_browser_timeout: Duration::from_secs(300),
            ..Default::default()
        };

        info!(headless = options.headless, "starting Chrome");
        let browser = Browser::new(launch).map_err(|e| BrowserError::Launch(format!("{e:#}")))?;
        let tab = browser
            .wait_for_initial_tab()
            .map_err(|e| BrowserError::Launch(format!("{e:#}")))?;
        info!("Chrome ready");

        Ok(Self {
            browser: Arc::new(browser),
            tab,
            viewport,
            modifiers: Arc::new(AtomicU32::new(0)),
            left_held: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Runs a blocking CDP operation against the primary tab off the async runtime.
    async fn with_tab<T, F>(&self, f: F) -> Result<T, BrowserError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T, BrowserError> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| BrowserError::Worker(e.to_string()))?
    }

    async fn mouse(
        &self,
        kind: Input::DispatchMouseEventTypeOption,
        at: Pixel,
        delta: Option<(i64, i64)>,
    ) -> Result<(), BrowserError> {
        let modifiers = self.modifiers.load(Ordering::SeqCst);
        let buttons = pointer_buttons(&kind, self.left_held.load(Ordering::SeqCst));
        self.with_tab(move |tab| {
            tab.call_method(Input::DispatchMouseEvent {
                Type: kind,
                x: f64::from(at.x),
                y: f64::from(at.y),
                modifiers: Some(modifiers),
                timestamp: None,
                button: buttons.button,
                buttons: Some(buttons.pressed),
                click_count: buttons.click_count,
                force: None,
                tangential_pressure: None,
                tilt_x: None,
                tilt_y: None,
                twist: None,
                delta_x: delta.map(|(dx, _)| dx as f64),
                delta_y: delta.map(|(_, dy)| dy as f64),
                pointer_Type: None,
            })
            .map(|_| ())
            .map_err(input_error)
        })
        .await
    }

    async fn key_event(&self, kind: KeyPhase, key: &str) -> Result<(), BrowserError> {
        let info = key_info(key)?;
        let bit = modifier_bit(&info.key);
        if kind == KeyPhase::Down && bit != 0 {
            self.modifiers.fetch_or(bit, Ordering::SeqCst);
        }
        let modifiers = self.modifiers.load(Ordering::SeqCst);
        if kind == KeyPhase::Up && bit != 0 {
            self.modifiers.fetch_and(!bit, Ordering::SeqCst);
        }

        // Shortcut chords must not insert their character.
        let shortcut = modifiers & (ALT | CONTROL | META) != 0;
        let text = if shortcut { None } else { info.text.clone() };
        let event_type = match kind {
            KeyPhase::Up => Input::DispatchKeyEventTypeOption::KeyUp,
            _ if text.is_some() => Input::DispatchKeyEventTypeOption::KeyDown,
            _ => Input::DispatchKeyEventTypeOption::RawKeyDown,
        };

        self.with_tab(move |tab| {
            tab.call_method(Input::DispatchKeyEvent {
                Type: event_type,
                modifiers: Some(modifiers),
                timestamp: None,
                text: text.clone(),
                unmodified_text: text,
                key_identifier: None,
                code: Some(info.code),
                key: Some(info.key),
                windows_virtual_key_code: Some(info.key_code),
                native_virtual_key_code: Some(info.key_code),
                auto_repeat: None,
                is_keypad: None,
                is_system_key: None,
                location: None,
                commands: None,
            })
            .map(|_| ())
            .map_err(input_error)
        })
        .await
    }

    /// Closes any tab other than the primary one and follows its URL in the primary tab.
    async fn enforce_single_tab(&self) -> Result<(), BrowserError> {
        let browser = Arc::clone(&self.browser);
        self.with_tab(move |primary| {
            let extras: Vec<Arc<Tab>> = {
                let tabs = browser
                    .get_tabs()
                    .lock()
                    .map_err(|e| BrowserError::Worker(e.to_string()))?;
                tabs.iter()
                    .filter(|tab| tab.get_target_id() != primary.get_target_id())
                    .cloned()
                    .collect()
            };

            for tab in extras {
                if let Err(err) = tab.wait_until_navigated() {
                    debug!("new tab did not finish loading: {err:#}");
                }
                let url = tab.get_url();
                info!(url = %url, "closing new tab and redirecting the primary tab");
                tab.close(false).map_err(input_error)?;
                if !url.is_empty() && url != "about:blank" {
                    primary
                        .navigate_to(&url)
                        .and_then(|tab| tab.wait_until_navigated())
                        .map_err(|e| BrowserError::Navigation {
                            url: url.clone(),
                            reason: format!("{e:#}"),
                        })?;
                }
            }
            Ok(())
        })
        .await
    }
}

/// Launches a dedicated Chrome per task.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    pub options: BrowserOptions,
}

#[async_trait]
impl SessionFactory for ChromeLauncher {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let options = self.options.clone();
        let session = tokio::task::spawn_blocking(move || ChromeSession::launch(&options))
            .await
            .map_err(|e| BrowserError::Worker(e.to_string()))??;
        Ok(Box::new(session))
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    fn viewport(&self) -> Viewport {
        self.viewport
    }

    async fn mouse_move(&self, at: Pixel) -> Result<(), BrowserError> {
        self.mouse(Input::DispatchMouseEventTypeOption::MouseMoved, at, None)
            .await
    }

    async fn mouse_down(&self, at: Pixel) -> Result<(), BrowserError> {
        self.mouse(Input::DispatchMouseEventTypeOption::MousePressed, at, None)
            .await?;
        self.left_held.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn mouse_up(&self, at: Pixel) -> Result<(), BrowserError> {
        self.left_held.store(false, Ordering::SeqCst);
        self.mouse(Input::DispatchMouseEventTypeOption::MouseReleased, at, None)
            .await
    }

    async fn click(&self, at: Pixel) -> Result<(), BrowserError> {
        self.mouse_move(at).await?;
        self.mouse_down(at).await?;
        self.mouse_up(at).await
    }

    async fn wheel(&self, at: Pixel, delta_x: i64, delta_y: i64) -> Result<(), BrowserError> {
        self.mouse(
            Input::DispatchMouseEventTypeOption::MouseWheel,
            at,
            Some((delta_x, delta_y)),
        )
        .await
    }

    async fn key_down(&self, key: &str) -> Result<(), BrowserError> {
        self.key_event(KeyPhase::Down, key).await
    }

    async fn key_up(&self, key: &str) -> Result<(), BrowserError> {
        self.key_event(KeyPhase::Up, key).await
    }

    async fn key_press(&self, key: &str) -> Result<(), BrowserError> {
        self.key_event(KeyPhase::Press, key).await?;
        self.key_event(KeyPhase::Up, key).await
    }

    async fn type_text(&self, text: &str) -> Result<(), BrowserError> {
        let text = text.to_string();
        self.with_tab(move |tab| tab.type_str(&text).map(|_| ()).map_err(input_error))
            .await
    }

    async fn scroll_by(&self, delta_x: i64, delta_y: i64) -> Result<(), BrowserError> {
        self.with_tab(move |tab| {
            tab.evaluate(&format!("window.scrollBy({delta_x}, {delta_y})"), false)
                .map(|_| ())
                .map_err(|e| BrowserError::Script(format!("{e:#}")))
        })
        .await
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let url = url.to_string();
        self.with_tab(move |tab| {
            tab.navigate_to(&url)
                .and_then(|tab| tab.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| BrowserError::Navigation {
                    url: url.clone(),
                    reason: format!("{e:#}"),
                })
        })
        .await
    }

    async fn go_back(&self) -> Result<(), BrowserError> {
        self.history_step("history.back()").await
    }

    async fn go_forward(&self) -> Result<(), BrowserError> {
        self.history_step("history.forward()").await
    }

    async fn wait_for_load(&self) -> Result<(), BrowserError> {
        self.with_tab(|tab| {
            tab.wait_until_navigated()
                .map(|_| ())
                .map_err(|e| BrowserError::Navigation {
                    url: tab.get_url(),
                    reason: format!("{e:#}"),
                })
        })
        .await?;
        self.enforce_single_tab().await
    }

    async fn screenshot(&self) -> Result<Screenshot, BrowserError> {
        self.with_tab(|tab| {
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                .map(Screenshot::png)
                .map_err(|e| BrowserError::Screenshot(format!("{e:#}")))
        })
        .await
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.with_tab(|tab| {
            let result = tab
                .evaluate("window.location.href", false)
                .map_err(|e| BrowserError::Script(format!("{e:#}")))?;
            Ok(result
                .value
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| tab.get_url()))
        })
        .await
    }
}

impl ChromeSession {
    async fn history_step(&self, script: &'static str) -> Result<(), BrowserError> {
        debug!(script, "session history navigation");
        self.with_tab(move |tab| {
            tab.evaluate(script, false)
                .map(|_| ())
                .map_err(|e| BrowserError::Script(format!("{e:#}")))
        })
        .await?;
        // history navigation is asynchronous in the page
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(())
    }
}

fn input_error(err: anyhow::Error) -> BrowserError {
    warn!("CDP input error: {err:#}");
    BrowserError::Input(format!("{err:#}"))
}

const LEFT_BUTTON: u32 = 1;

/// Button fields of one CDP mouse event.
#[derive(Debug, Clone, PartialEq)]
struct PointerButtons {
    button: Option<Input::MouseButton>,
    /// Bitmask of buttons held while the event is dispatched.
    pressed: u32,
    click_count: Option<u32>,
}

/// Moves made while the left button is held carry it, so pages see a drag.
fn pointer_buttons(kind: &Input::DispatchMouseEventTypeOption, left_held: bool) -> PointerButtons {
    match kind {
        Input::DispatchMouseEventTypeOption::MousePressed => PointerButtons {
            button: Some(Input::MouseButton::Left),
            pressed: LEFT_BUTTON,
            click_count: Some(1),
        },
        Input::DispatchMouseEventTypeOption::MouseReleased => PointerButtons {
            button: Some(Input::MouseButton::Left),
            pressed: 0,
            click_count: Some(1),
        },
        Input::DispatchMouseEventTypeOption::MouseMoved if left_held => PointerButtons {
            button: Some(Input::MouseButton::Left),
            pressed: LEFT_BUTTON,
            click_count: None,
        },
        _ => PointerButtons {
            button: None,
            pressed: 0,
            click_count: None,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyPhase {
    Down,
    Press,
    Up,
}

const ALT: u32 = 1;
const CONTROL: u32 = 2;
const META: u32 = 4;
const SHIFT: u32 = 8;

fn modifier_bit(key: &str) -> u32 {
    match key {
        "Alt" => ALT,
        "Control" => CONTROL,
        "Meta" => META,
        "Shift" => SHIFT,
        _ => 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyInfo {
    key: String,
    code: String,
    key_code: u32,
    text: Option<String>,
}

/// CDP key description for a DOM key name.
fn key_info(key: &str) -> Result<KeyInfo, BrowserError> {
    let named = |code: &str, key_code: u32, text: Option<&str>| KeyInfo {
        key: key.to_string(),
        code: code.to_string(),
        key_code,
        text: text.map(str::to_string),
    };

    let info = match key {
        "Control" => named("ControlLeft", 17, None),
        "Shift" => named("ShiftLeft", 16, None),
        "Alt" => named("AltLeft", 18, None),
        "Meta" => named("MetaLeft", 91, None),
        "Enter" => named("Enter", 13, Some("\r")),
        "Tab" => named("Tab", 9, None),
        "Backspace" => named("Backspace", 8, None),
        "Delete" => named("Delete", 46, None),
        "Escape" => named("Escape", 27, None),
        "Insert" => named("Insert", 45, None),
        "PageUp" => named("PageUp", 33, None),
        "PageDown" => named("PageDown", 34, None),
        "End" => named("End", 35, None),
        "Home" => named("Home", 36, None),
        "ArrowLeft" => named("ArrowLeft", 37, None),
        "ArrowUp" => named("ArrowUp", 38, None),
        "ArrowRight" => named("ArrowRight", 39, None),
        "ArrowDown" => named("ArrowDown", 40, None),
        _ => {
            if let Some(n) = key.strip_prefix('F').and_then(|n| n.parse::<u32>().ok()) {
                if (1..=12).contains(&n) {
                    return Ok(named(key, 111 + n, None));
                }
            }
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => char_key_info(c),
                _ => return Err(BrowserError::UnknownKey(key.to_string())),
            }
        }
    };
    Ok(info)
}

fn char_key_info(c: char) -> KeyInfo {
    let (code, key_code) = if c.is_ascii_alphabetic() {
        (
            format!("Key{}", c.to_ascii_uppercase()),
            u32::from(c.to_ascii_uppercase()),
        )
    } else if c.is_ascii_digit() {
        (format!("Digit{c}"), u32::from(c))
    } else {
        let (code, key_code) = match c {
            ' ' => ("Space", 32),
            '-' | '_' => ("Minus", 189),
            '=' | '+' => ("Equal", 187),
            ',' | '<' => ("Comma", 188),
            '.' | '>' => ("Period", 190),
            '/' | '?' => ("Slash", 191),
            ';' | ':' => ("Semicolon", 186),
            '\'' | '"' => ("Quote", 222),
            '`' | '~' => ("Backquote", 192),
            '[' | '{' => ("BracketLeft", 219),
            ']' | '}' => ("BracketRight", 221),
            '\\' | '|' => ("Backslash", 220),
            _ => ("", 0),
        };
        (code.to_string(), key_code)
    };
    KeyInfo {
        key: c.to_string(),
        code,
        key_code,
        text: Some(c.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_have_codes() {
        let enter = key_info("Enter").unwrap();
        assert_eq!(enter.key_code, 13);
        assert_eq!(enter.text.as_deref(), Some("\r"));
        assert_eq!(key_info("PageDown").unwrap().key_code, 34);
        assert_eq!(key_info("F5").unwrap().key_code, 116);
    }

    #[test]
    fn letters_map_to_virtual_key_codes() {
        let a = key_info("a").unwrap();
        assert_eq!(a.code, "KeyA");
        assert_eq!(a.key_code, 65);
        assert_eq!(a.text.as_deref(), Some("a"));
        assert_eq!(key_info("7").unwrap().code, "Digit7");
        assert_eq!(key_info(" ").unwrap().code, "Space");
    }

    #[test]
    fn unknown_multi_char_keys_are_rejected() {
        assert!(matches!(
            key_info("Hyper"),
            Err(BrowserError::UnknownKey(name)) if name == "Hyper"
        ));
        assert!(key_info("F13").is_err());
    }

    #[test]
    fn moves_during_a_drag_hold_the_left_button() {
        use Input::DispatchMouseEventTypeOption::{MouseMoved, MousePressed, MouseReleased, MouseWheel};

        let dragging = pointer_buttons(&MouseMoved, true);
        assert_eq!(dragging.button, Some(Input::MouseButton::Left));
        assert_eq!(dragging.pressed, LEFT_BUTTON);
        assert_eq!(dragging.click_count, None);

        let hovering = pointer_buttons(&MouseMoved, false);
        assert_eq!(hovering.button, None);
        assert_eq!(hovering.pressed, 0);

        assert_eq!(pointer_buttons(&MousePressed, false).pressed, LEFT_BUTTON);
        let release = pointer_buttons(&MouseReleased, true);
        assert_eq!(release.button, Some(Input::MouseButton::Left));
        assert_eq!(release.pressed, 0);
        assert_eq!(release.click_count, Some(1));
        assert_eq!(pointer_buttons(&MouseWheel, true).button, None);
    }

    #[test]
    fn modifier_bits() {
        assert_eq!(modifier_bit("Control") | modifier_bit("Shift"), CONTROL | SHIFT);
        assert_eq!(modifier_bit("A"), 0);
    }
}
