//! Test doubles for the device and transport seams.
//!
//! Every fake is `Clone` over shared state, so a test keeps one handle for
//! inspection after moving the other into the code under test.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::event::{AgentEvent, Outbound};
use super::transport::{AgentConnector, AgentLink, Connection};
use crate::audio::{AudioError, CaptureDevice, CaptureTap, PlaybackChunk, PlaybackDevice};
use crate::collab::MediaRecorder;
use crate::config::AgentConfig;
use crate::error::SessionError;

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Output clock that only moves when told to.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        *self.now.lock().unwrap()
    }

    pub fn advance(&self, secs: f64) {
        *self.now.lock().unwrap() += secs;
    }
}

// ---------------------------------------------------------------------------
// FakePlayback
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PlaybackLog {
    scheduled: Vec<PlaybackChunk>,
    active: Vec<PlaybackChunk>,
    released: bool,
}

#[derive(Clone)]
pub struct FakePlayback {
    clock: ManualClock,
    rate: u32,
    log: Arc<Mutex<PlaybackLog>>,
}

impl FakePlayback {
    pub fn new(clock: ManualClock, rate: u32) -> Self {
        Self {
            clock,
            rate,
            log: Arc::default(),
        }
    }

    /// Every chunk ever scheduled, in order.
    pub fn scheduled(&self) -> Vec<PlaybackChunk> {
        self.log.lock().unwrap().scheduled.clone()
    }

    /// Chunks not stopped and not yet finished at the current clock.
    pub fn active_chunks(&self) -> usize {
        let now = self.clock.now();
        self.log
            .lock()
            .unwrap()
            .active
            .iter()
            .filter(|c| c.end() > now)
            .count()
    }

    pub fn is_released(&self) -> bool {
        self.log.lock().unwrap().released
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }
}

impl PlaybackDevice for FakePlayback {
    fn now(&self) -> f64 {
        self.clock.now()
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn schedule(&mut self, chunk: PlaybackChunk) -> Result<(), AudioError> {
        let mut log = self.log.lock().unwrap();
        if log.released {
            return Err(AudioError::Released);
        }
        log.scheduled.push(chunk.clone());
        log.active.push(chunk);
        Ok(())
    }

    fn stop_all(&mut self) {
        self.log.lock().unwrap().active.clear();
    }

    fn release(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.active.clear();
        log.released = true;
    }
}

// ---------------------------------------------------------------------------
// FakeCapture
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CaptureInner {
    tap: Option<CaptureTap>,
    fail_next: bool,
    released: bool,
}

/// Microphone driven by [`FakeCapture::feed`].
#[derive(Clone, Default)]
pub struct FakeCapture {
    inner: Arc<Mutex<CaptureInner>>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_start(&self) {
        self.inner.lock().unwrap().fail_next = true;
    }

    /// Deliver samples as the device callback would.
    pub fn feed(&self, samples: &[f32]) {
        if let Some(tap) = self.inner.lock().unwrap().tap.as_mut() {
            tap.push(samples);
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().unwrap().tap.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().unwrap().released
    }
}

impl CaptureDevice for FakeCapture {
    fn start(&mut self, tap: CaptureTap) -> Result<(), AudioError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.released {
            return Err(AudioError::Released);
        }
        if std::mem::take(&mut inner.fail_next) {
            return Err(AudioError::NoDevice);
        }
        inner.tap = Some(tap);
        Ok(())
    }

    fn stop(&mut self) {
        self.inner.lock().unwrap().tap = None;
    }

    fn release(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.tap = None;
        inner.released = true;
    }
}

// ---------------------------------------------------------------------------
// TestRecorder
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct TestRecorder {
    recording: Arc<AtomicBool>,
}

impl TestRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }
}

impl MediaRecorder for TestRecorder {
    fn start(&mut self) {
        self.recording.store(true, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.recording.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// ScriptedConnector
// ---------------------------------------------------------------------------

/// Handle on one link handed out by [`ScriptedConnector`].
#[derive(Clone)]
pub struct FakeLinkHandle {
    events: mpsc::Sender<AgentEvent>,
    sent: Arc<Mutex<Vec<Outbound>>>,
    closed: Arc<AtomicBool>,
}

impl FakeLinkHandle {
    /// Push an inbound event as if the agent sent it.
    pub fn inject(&self, event: AgentEvent) {
        let _ = self.events.try_send(event);
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_audio(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m, Outbound::Audio { .. }))
            .count()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                Outbound::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeLink {
    handle: FakeLinkHandle,
}

impl AgentLink for FakeLink {
    fn send(&self, message: Outbound) -> Result<(), SessionError> {
        if self.handle.is_closed() {
            return Err(SessionError::Transport("link closed".into()));
        }
        self.handle.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn close(&self) {
        if !self.handle.closed.swap(true, Ordering::SeqCst) {
            self.handle.inject(AgentEvent::Closed {
                code: 1000,
                reason: String::new(),
            });
        }
    }
}

#[derive(Default)]
struct Script {
    failures: VecDeque<Option<SessionError>>,
    links: Vec<FakeLinkHandle>,
    connects: u32,
    manual_open: bool,
}

/// Connector whose outcomes are queued by the test.
///
/// Connects succeed unless a failure was queued; a successful link emits
/// `Opened` immediately unless [`manual_open`](Self::manual_open) was set.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_failure(&self, err: SessionError) {
        self.script.lock().unwrap().failures.push_back(Some(err));
    }

    pub fn push_success(&self) {
        self.script.lock().unwrap().failures.push_back(None);
    }

    /// Links will not announce `Opened` on their own.
    pub fn manual_open(&self) {
        self.script.lock().unwrap().manual_open = true;
    }

    pub fn connect_count(&self) -> u32 {
        self.script.lock().unwrap().connects
    }

    pub fn last_link(&self) -> FakeLinkHandle {
        self.script
            .lock()
            .unwrap()
            .links
            .last()
            .cloned()
            .expect("no link was opened")
    }
}

#[async_trait]
impl AgentConnector for ScriptedConnector {
    async fn connect(&self, _config: &AgentConfig) -> Result<Connection, SessionError> {
        let mut script = self.script.lock().unwrap();
        script.connects += 1;
        if let Some(Some(err)) = script.failures.pop_front() {
            return Err(err);
        }

        let (tx, rx) = mpsc::channel(64);
        let handle = FakeLinkHandle {
            events: tx,
            sent: Arc::default(),
            closed: Arc::default(),
        };
        if !script.manual_open {
            handle.inject(AgentEvent::Opened);
        }
        script.links.push(handle.clone());
        Ok(Connection {
            link: Box::new(FakeLink { handle }),
            events: rx,
        })
    }
}
