//! Dedicated OS-thread hotkey listener using `rdev::listen`.
//!
//! # Shutdown caveat
//!
//! `rdev::listen` has **no graceful shutdown API**.  Setting the stop flag
//! prevents events from being forwarded, but the OS thread itself stays
//! blocked in the rdev event loop until the process exits.  rdev holds no
//! resources that need explicit cleanup.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::mpsc;

use super::{HotkeyBindings, HotkeyEvent, HotkeyMatcher};

/// Handle to a running hotkey listener thread.  Drop it to stop forwarding.
pub struct HotkeyListener {
    stop: Arc<AtomicBool>,
    /// Never joined: `rdev::listen` does not return.
    _thread: std::thread::JoinHandle<()>,
}

impl HotkeyListener {
    /// Spawn the listener thread and forward matched events on `tx`.
    ///
    /// See [`forward`] for what happens when the session loop falls behind.
    pub fn start(bindings: HotkeyBindings, tx: mpsc::Sender<HotkeyEvent>) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("hotkey-listener".into())
            .spawn(move || {
                let mut matcher = HotkeyMatcher::new(bindings);
                let result = rdev::listen(move |event| {
                    if stop_flag.load(Ordering::Relaxed) {
                        return;
                    }
                    if let Some(hotkey) = matcher.on_event(&event.event_type) {
                        forward(&tx, hotkey);
                    }
                });

                if let Err(e) = result {
                    log::error!("hotkey-listener: rdev::listen exited with error: {:?}", e);
                }
            })?;

        log::info!(
            "hotkey: push-to-talk {:?}, mute {:?}, score {:?}",
            bindings.push_to_talk,
            bindings.mute,
            bindings.score
        );
        Ok(Self {
            stop,
            _thread: thread,
        })
    }
}

/// Hand one event to the session loop from the listener thread.
///
/// Presses are dropped when the queue is full rather than stalling the OS
/// hook.  A push-to-talk release waits for room: losing it would leave the
/// microphone open.  Returns whether the event was delivered.
fn forward(tx: &mpsc::Sender<HotkeyEvent>, hotkey: HotkeyEvent) -> bool {
    let sent = match hotkey {
        HotkeyEvent::PushToTalkReleased => tx.blocking_send(hotkey).is_ok(),
        _ => tx.try_send(hotkey).is_ok(),
    };
    if !sent {
        log::debug!("hotkey: dropped {hotkey:?}");
    }
    sent
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
