//! Owner of the one agent link per session.
//!
//! [`SessionConnectionManager`] holds the connection state, the send half of
//! the link and the audio pipeline, and treats them as one unit.  Content
//! events (text, audio, turn-complete) are passed back to the runner for
//! routing; connection-level events are handled here.
//!
//! # Teardown order
//!
//! [`close`](SessionConnectionManager::close) always runs:
//!
//! 1. deactivate the session context,
//! 2. stop all playback,
//! 3. close the transport,
//! 4. stop the recorder and the capture device,
//! 5. release the audio engine.
//!
//! so a media callback that races teardown sees an inactive session before
//! it can reach a closed link or a released device.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::context::{Modes, SessionContext};
use super::event::{AgentEvent, Outbound};
use super::state::ConnectionState;
use super::transport::{AgentConnector, AgentLink};
use crate::audio::{AudioFrame, AudioPipeline, CaptureDevice, PlaybackDevice};
use crate::collab::MediaRecorder;
use crate::config::AgentConfig;
use crate::error::SessionError;

/// What an inbound event means to the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The link reached Open (capture is running).
    Opened,
    /// Playback was already stopped; the runner closes the agent utterance.
    Interrupted,
    /// Text, audio or turn-complete for the runner to route.
    Content(AgentEvent),
    /// An established link dropped while the session was active.
    Lost(SessionError),
    /// The link closed before it ever reached Open.
    Refused(SessionError),
    /// A terminal failure; the session must end.
    Failed(SessionError),
    /// The link closed because we asked it to.
    Closed,
    Ignored,
}

pub struct SessionConnectionManager<C: CaptureDevice, P: PlaybackDevice> {
    ctx: Arc<SessionContext>,
    config: AgentConfig,
    connector: Arc<dyn AgentConnector>,
    pipeline: AudioPipeline<C, P>,
    frames: mpsc::Sender<AudioFrame>,
    recorder: Option<Box<dyn MediaRecorder>>,
    link: Option<Box<dyn AgentLink>>,
    state: ConnectionState,
    closed: bool,
}

impl<C: CaptureDevice, P: PlaybackDevice> SessionConnectionManager<C, P> {
    pub fn new(
        ctx: Arc<SessionContext>,
        config: AgentConfig,
        connector: Arc<dyn AgentConnector>,
        pipeline: AudioPipeline<C, P>,
        frames: mpsc::Sender<AudioFrame>,
        recorder: Option<Box<dyn MediaRecorder>>,
    ) -> Self {
        Self {
            ctx,
            config,
            connector,
            pipeline,
            frames,
            recorder,
            link: None,
            state: ConnectionState::Idle,
            closed: false,
        }
    }

    // -----------------------------------------------------------------------
    // Connect
    // -----------------------------------------------------------------------

    /// Open a new link with the fixed agent configuration.
    ///
    /// Only allowed from Idle, Closed or Error, so at most one link exists.
    pub async fn connect(&mut self) -> Result<mpsc::Receiver<AgentEvent>, SessionError> {
        if self.closed {
            return Err(SessionError::Transport("session already closed".into()));
        }
        if !self.state.can_connect() {
            return Err(SessionError::Transport(format!(
                "cannot connect while {}",
                self.state.label()
            )));
        }
        self.drop_link();
        self.state = ConnectionState::Connecting;

        match self.connector.connect(&self.config).await {
            Ok(conn) => {
                if !self.ctx.is_active() {
                    // Ended while the handshake was in flight.
                    conn.link.close();
                    self.state = ConnectionState::Closed;
                    return Err(SessionError::Transport("session ended during connect".into()));
                }
                self.link = Some(conn.link);
                Ok(conn.events)
            }
            Err(e) => {
                log::warn!("session: connect failed: {e}");
                self.state = ConnectionState::Error;
                Err(e)
            }
        }
    }

    /// Give up on a link that never opened.
    pub fn abandon(&mut self) {
        self.drop_link();
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Error;
        }
    }

    fn drop_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Transmit one microphone frame; silently skipped unless the session is
    /// active, the link is Open and the input mode lets the mic through.
    pub fn send_frame(&self, frame: &AudioFrame, modes: &Modes) -> bool {
        if !modes.mic_transmits() {
            return false;
        }
        self.send(Outbound::Audio {
            pcm: frame.to_pcm16(),
            sample_rate: frame.sample_rate,
        })
    }

    /// Transmit one JPEG still frame under the same guard as audio.
    pub fn send_image(&self, jpeg: Vec<u8>) -> bool {
        self.send(Outbound::Image(jpeg))
    }

    /// Send a one-shot text turn.
    pub fn send_text(&self, text: &str) -> Result<(), SessionError> {
        if !self.ctx.is_active() || self.state != ConnectionState::Open {
            return Err(SessionError::Transport("link is not open".into()));
        }
        match &self.link {
            Some(link) => link.send(Outbound::Text(text.to_string())),
            None => Err(SessionError::Transport("link is not open".into())),
        }
    }

    fn send(&self, message: Outbound) -> bool {
        if !self.ctx.is_active() || self.state != ConnectionState::Open {
            return false;
        }
        let Some(link) = &self.link else { return false };
        match link.send(message) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("session: dropped outbound message: {e}");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Dispatch one inbound event.
    pub fn on_event(&mut self, event: AgentEvent) -> Dispatch {
        if self.closed {
            return Dispatch::Ignored;
        }

        match event {
            AgentEvent::Interrupted => {
                // Before anything else from this frame reaches playback.
                self.pipeline.stop_all_playback();
                Dispatch::Interrupted
            }
            AgentEvent::Opened => self.on_opened(),
            AgentEvent::Closed { code, reason } => self.on_closed(code, reason),
            AgentEvent::GoAway => {
                log::info!("session: server announced it will close the link");
                Dispatch::Ignored
            }
            content => {
                if self.state == ConnectionState::Open && self.ctx.is_active() {
                    Dispatch::Content(content)
                } else {
                    Dispatch::Ignored
                }
            }
        }
    }

    fn on_opened(&mut self) -> Dispatch {
        if self.state != ConnectionState::Connecting || !self.ctx.is_active() {
            return Dispatch::Ignored;
        }
        self.state = ConnectionState::Open;
        log::info!("session: link open");

        if !self.pipeline.is_capturing() {
            if let Err(e) = self.pipeline.start_capture(self.frames.clone()) {
                log::error!("session: capture failed to start: {e}");
                return Dispatch::Failed(e.into());
            }
            if let Some(recorder) = self.recorder.as_mut() {
                recorder.start();
            }
        }
        Dispatch::Opened
    }

    fn on_closed(&mut self, code: u16, reason: String) -> Dispatch {
        let expected = !self.ctx.is_active() || self.state == ConnectionState::Closing;
        let was_open = self.state == ConnectionState::Open;
        self.link = None;
        if expected {
            self.state = ConnectionState::Closed;
            return Dispatch::Closed;
        }
        self.pipeline.stop_all_playback();
        let err = SessionError::UnexpectedClose { code, reason };
        if !was_open {
            log::warn!("session: link closed before it opened: {err}");
            self.state = ConnectionState::Error;
            return Dispatch::Refused(err);
        }
        log::warn!("session: link closed unexpectedly: {err}");
        self.state = ConnectionState::Closed;
        Dispatch::Lost(err)
    }

    /// Schedule agent audio; a no-op once the session is inactive.
    pub fn play_audio(&mut self, bytes: &[u8]) -> bool {
        if !self.ctx.is_active() {
            return false;
        }
        match self.pipeline.enqueue_playback(bytes) {
            Ok(handle) => handle.is_some(),
            Err(e) => {
                log::warn!("session: playback failed: {e}");
                false
            }
        }
    }

    pub fn stop_all_playback(&mut self) {
        self.pipeline.stop_all_playback();
    }

    // -----------------------------------------------------------------------
    // Close
    // -----------------------------------------------------------------------

    /// Deterministic teardown; safe to call any number of times.
    pub fn close(&mut self) {
        // 1
        self.ctx.deactivate();
        if self.closed {
            return;
        }
        self.closed = true;
        // 2
        self.pipeline.stop_all_playback();
        // 3
        if self.link.is_some() {
            self.state = ConnectionState::Closing;
        }
        self.drop_link();
        self.state = ConnectionState::Closed;
        // 4
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.stop();
        }
        self.pipeline.stop_capture();
        // 5
        self.pipeline.teardown();
        log::info!("session: closed");
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn pipeline(&self) -> &AudioPipeline<C, P> {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut AudioPipeline<C, P> {
        &mut self.pipeline
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
