//! Global hotkeys for push-to-talk, mute and score requests, backed by `rdev`.
//!
//! # Design
//!
//! `rdev::listen()` is a blocking OS-level call that never returns while the
//! process is alive.  It must run on a **dedicated OS thread**; it cannot be
//! used inside a tokio task.
//!
//! [`HotkeyListener::start`] spawns that thread and returns a handle.
//! Dropping the handle sets a stop flag so the callback silently discards
//! further events.  Raw key events go through a [`HotkeyMatcher`], which
//! maps them to [`HotkeyEvent`]s and swallows OS auto-repeat.
//!
//! # Usage
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use agnes_voice::config::HotkeyConfig;
//! use agnes_voice::hotkey::{HotkeyBindings, HotkeyListener};
//!
//! let (tx, mut rx) = mpsc::channel(16);
//! let bindings = HotkeyBindings::from_config(&HotkeyConfig::default());
//! let _listener = HotkeyListener::start(bindings, tx).expect("hotkey thread");
//!
//! // In your async loop:
//! // while let Some(ev) = rx.recv().await { commands.send(ev.into()).await; }
//! ```

pub mod listener;

pub use listener::HotkeyListener;

use crate::config::HotkeyConfig;
use crate::session::SessionCommand;

// ---------------------------------------------------------------------------
// HotkeyEvent
// ---------------------------------------------------------------------------

/// Events emitted by the hotkey listener thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    /// The push-to-talk key was pressed down.
    PushToTalkPressed,
    /// The push-to-talk key was released.
    PushToTalkReleased,
    ToggleMute,
    RequestScore,
}

impl From<HotkeyEvent> for SessionCommand {
    fn from(event: HotkeyEvent) -> Self {
        match event {
            HotkeyEvent::PushToTalkPressed => SessionCommand::PushToTalk(true),
            HotkeyEvent::PushToTalkReleased => SessionCommand::PushToTalk(false),
            HotkeyEvent::ToggleMute => SessionCommand::ToggleMute,
            HotkeyEvent::RequestScore => SessionCommand::RequestScore,
        }
    }
}

// ---------------------------------------------------------------------------
// HotkeyBindings
// ---------------------------------------------------------------------------

/// Resolved keys for each action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyBindings {
    pub push_to_talk: rdev::Key,
    pub mute: rdev::Key,
    pub score: rdev::Key,
}

impl Default for HotkeyBindings {
    fn default() -> Self {
        Self {
            push_to_talk: rdev::Key::F9,
            mute: rdev::Key::F8,
            score: rdev::Key::F10,
        }
    }
}

impl HotkeyBindings {
    /// Resolve key names from config; unknown names fall back to the default
    /// binding with a warning.
    pub fn from_config(config: &HotkeyConfig) -> Self {
        let defaults = Self::default();
        Self {
            push_to_talk: resolve("push_to_talk_key", &config.push_to_talk_key, defaults.push_to_talk),
            mute: resolve("mute_key", &config.mute_key, defaults.mute),
            score: resolve("score_key", &config.score_key, defaults.score),
        }
    }
}

fn resolve(field: &str, name: &str, fallback: rdev::Key) -> rdev::Key {
    parse_key(name).unwrap_or_else(|| {
        log::warn!("hotkey: unknown key {name:?} for {field}, using {fallback:?}");
        fallback
    })
}

// ---------------------------------------------------------------------------
// HotkeyMatcher
// ---------------------------------------------------------------------------

/// Turns raw key events into [`HotkeyEvent`]s.
///
/// Held keys auto-repeat `KeyPress` on most platforms; only the first press
/// of each key counts until it is released.
#[derive(Debug)]
pub struct HotkeyMatcher {
    bindings: HotkeyBindings,
    ptt_down: bool,
    mute_down: bool,
    score_down: bool,
}

impl HotkeyMatcher {
    pub fn new(bindings: HotkeyBindings) -> Self {
        Self {
            bindings,
            ptt_down: false,
            mute_down: false,
            score_down: false,
        }
    }

    pub fn on_event(&mut self, event: &rdev::EventType) -> Option<HotkeyEvent> {
        let b = self.bindings;
        match *event {
            rdev::EventType::KeyPress(k) if k == b.push_to_talk => {
                first_press(&mut self.ptt_down).then_some(HotkeyEvent::PushToTalkPressed)
            }
            rdev::EventType::KeyRelease(k) if k == b.push_to_talk => {
                self.ptt_down = false;
                Some(HotkeyEvent::PushToTalkReleased)
            }
            rdev::EventType::KeyPress(k) if k == b.mute => {
                first_press(&mut self.mute_down).then_some(HotkeyEvent::ToggleMute)
            }
            rdev::EventType::KeyRelease(k) if k == b.mute => {
                self.mute_down = false;
                None
            }
            rdev::EventType::KeyPress(k) if k == b.score => {
                first_press(&mut self.score_down).then_some(HotkeyEvent::RequestScore)
            }
            rdev::EventType::KeyRelease(k) if k == b.score => {
                self.score_down = false;
                None
            }
            _ => None,
        }
    }
}

fn first_press(down: &mut bool) -> bool {
    !std::mem::replace(down, true)
}

// ---------------------------------------------------------------------------
// parse_key
// ---------------------------------------------------------------------------

/// Parse a hotkey name from a config string into an [`rdev::Key`].
///
/// Supports F1–F12, common named keys, and single uppercase or lowercase ASCII
/// letters.  Returns `None` for unrecognised names.
///
/// # Examples
///
/// ```
/// use agnes_voice::hotkey::parse_key;
///
/// assert_eq!(parse_key("F9"),      Some(rdev::Key::F9));
/// assert_eq!(parse_key("Escape"),  Some(rdev::Key::Escape));
/// assert_eq!(parse_key("m"),       Some(rdev::Key::KeyM));
/// assert_eq!(parse_key("xyz"),     None);
/// ```
pub fn parse_key(key_str: &str) -> Option<rdev::Key> {
    use rdev::Key;

    let key = match key_str {
        "F1" => Key::F1,
        "F2" => Key::F2,
        "F3" => Key::F3,
        "F4" => Key::F4,
        "F5" => Key::F5,
        "F6" => Key::F6,
        "F7" => Key::F7,
        "F8" => Key::F8,
        "F9" => Key::F9,
        "F10" => Key::F10,
        "F11" => Key::F11,
        "F12" => Key::F12,

        "Escape" | "Esc" => Key::Escape,
        "Space" => Key::Space,
        "Return" | "Enter" => Key::Return,
        "Tab" => Key::Tab,
        "Backspace" => Key::Backspace,
        "Delete" | "Del" => Key::Delete,
        "Home" => Key::Home,
        "End" => Key::End,
        "PageUp" => Key::PageUp,
        "PageDown" => Key::PageDown,
        "UpArrow" | "Up" => Key::UpArrow,
        "DownArrow" | "Down" => Key::DownArrow,
        "LeftArrow" | "Left" => Key::LeftArrow,
        "RightArrow" | "Right" => Key::RightArrow,

        "CapsLock" => Key::CapsLock,
        "NumLock" => Key::NumLock,
        "ScrollLock" => Key::ScrollLock,
        "PrintScreen" => Key::PrintScreen,
        "Pause" => Key::Pause,

        other => return letter_key(other),
    };
    Some(key)
}

fn letter_key(name: &str) -> Option<rdev::Key> {
    use rdev::Key;

    let mut chars = name.chars();
    let (Some(c), None) = (chars.next(), chars.next()) else {
        return None;
    };
    let key = match c.to_ascii_uppercase() {
        'A' => Key::KeyA,
        'B' => Key::KeyB,
        'C' => Key::KeyC,
        'D' => Key::KeyD,
        'E' => Key::KeyE,
        'F' => Key::KeyF,
        'G' => Key::KeyG,
        'H' => Key::KeyH,
        'I' => Key::KeyI,
        'J' => Key::KeyJ,
        'K' => Key::KeyK,
        'L' => Key::KeyL,
        'M' => Key::KeyM,
        'N' => Key::KeyN,
        'O' => Key::KeyO,
        'P' => Key::KeyP,
        'Q' => Key::KeyQ,
        'R' => Key::KeyR,
        'S' => Key::KeyS,
        'T' => Key::KeyT,
        'U' => Key::KeyU,
        'V' => Key::KeyV,
        'W' => Key::KeyW,
        'X' => Key::KeyX,
        'Y' => Key::KeyY,
        'Z' => Key::KeyZ,
        _ => return None,
    };
    Some(key)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rdev::EventType::{KeyPress, KeyRelease};
    use rdev::Key;

    #[test]
    fn parse_function_and_named_keys() {
        assert_eq!(parse_key("F9"), Some(Key::F9));
        assert_eq!(parse_key("F12"), Some(Key::F12));
        assert_eq!(parse_key("Esc"), Some(Key::Escape));
        assert_eq!(parse_key("Enter"), Some(Key::Return));
    }

    #[test]
    fn parse_letter_keys_case_insensitive() {
        assert_eq!(parse_key("A"), Some(Key::KeyA));
        assert_eq!(parse_key("z"), Some(Key::KeyZ));
    }

    #[test]
    fn parse_unknown_key_returns_none() {
        assert_eq!(parse_key("xyz"), None);
        assert_eq!(parse_key(""), None);
        assert_eq!(parse_key("Ctrl+V"), None);
        assert_eq!(parse_key("1"), None);
    }

    #[test]
    fn unknown_config_names_fall_back_to_defaults() {
        let config = HotkeyConfig {
            mute_key: "Hyper".into(),
            score_key: "s".into(),
            ..HotkeyConfig::default()
        };
        let bindings = HotkeyBindings::from_config(&config);
        assert_eq!(bindings.mute, Key::F8);
        assert_eq!(bindings.score, Key::KeyS);
        assert_eq!(bindings.push_to_talk, Key::F9);
    }

    #[test]
    fn push_to_talk_press_and_release() {
        let mut m = HotkeyMatcher::new(HotkeyBindings::default());
        assert_eq!(m.on_event(&KeyPress(Key::F9)), Some(HotkeyEvent::PushToTalkPressed));
        assert_eq!(m.on_event(&KeyPress(Key::F9)), None, "auto-repeat");
        assert_eq!(m.on_event(&KeyRelease(Key::F9)), Some(HotkeyEvent::PushToTalkReleased));
        assert_eq!(m.on_event(&KeyPress(Key::F9)), Some(HotkeyEvent::PushToTalkPressed));
    }

    #[test]
    fn held_mute_key_toggles_once() {
        let mut m = HotkeyMatcher::new(HotkeyBindings::default());
        assert_eq!(m.on_event(&KeyPress(Key::F8)), Some(HotkeyEvent::ToggleMute));
        assert_eq!(m.on_event(&KeyPress(Key::F8)), None);
        assert_eq!(m.on_event(&KeyRelease(Key::F8)), None);
        assert_eq!(m.on_event(&KeyPress(Key::F8)), Some(HotkeyEvent::ToggleMute));
    }

    #[test]
    fn score_key_and_unrelated_keys() {
        let mut m = HotkeyMatcher::new(HotkeyBindings::default());
        assert_eq!(m.on_event(&KeyPress(Key::KeyQ)), None);
        assert_eq!(m.on_event(&KeyPress(Key::F10)), Some(HotkeyEvent::RequestScore));
    }

    #[test]
    fn events_map_to_session_commands() {
        assert_eq!(SessionCommand::from(HotkeyEvent::PushToTalkPressed), SessionCommand::PushToTalk(true));
        assert_eq!(SessionCommand::from(HotkeyEvent::ToggleMute), SessionCommand::ToggleMute);
        assert_eq!(SessionCommand::from(HotkeyEvent::RequestScore), SessionCommand::RequestScore);
    }
}
