//! Session orchestrator: one cooperative loop over every input.
//!
//! [`SessionRunner`] owns the connection manager, the voice-activity
//! monitor, the score protocol and the reconnection controller, and is the
//! only writer of [`SharedState`].  Its [`run`](SessionRunner::run) loop
//! waits on
//!
//! * [`SessionCommand`]s from the UI or hotkeys,
//! * inbound [`AgentEvent`]s from the current link,
//! * captured [`AudioFrame`]s,
//! * the score-request deadline,
//! * the deadline for a first link to open,
//! * the reconnection deadline, and
//! * the VAD tick.
//!
//! Handlers never run concurrently, so none of the state below needs a lock.
//!
//! # Routing
//!
//! ```text
//! AgentEvent ─▶ manager.on_event ─┬─ Interrupted ─▶ (playback already stopped) close agent turn
//!                                 ├─ Content ─┬─ score active ─▶ ScoreRequestProtocol (audio swallowed)
//!                                 │           └─ otherwise ────▶ transcript / playback / implicit-end check
//!                                 ├─ Lost ─────▶ ReconnectionController
//!                                 ├─ Refused ──▶ same as a failed connect
//!                                 └─ Failed ───▶ terminal error, teardown
//! ```

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};

use super::context::{ConversationMode, Modes, SessionContext};
use super::event::AgentEvent;
use super::manager::{Dispatch, SessionConnectionManager};
use super::state::{ActivityState, ConnectionState, SharedState, UiState};
use super::transcript::{AgentTextMerger, Speaker, TranscriptAssembler, TranscriptEntry, TranscriptEvent};
use super::transport::AgentConnector;
use crate::audio::{AudioFrame, AudioPipeline, CaptureDevice, PlaybackDevice, VoiceActivityMonitor, VoiceTransition};
use crate::collab::{publish_session, Collaborators, SessionRecord, SessionStore, StreakInfo, XpCalculator};
use crate::config::AppConfig;
use crate::error::SessionError;
use crate::reconnect::{ReconnectStep, ReconnectionController};
use crate::scoring::{ScoreError, ScoreRecognizers, ScoreRequestProtocol, ScoreResult};

const LEVEL_BARS: usize = 16;
const GAVE_UP_MESSAGE: &str = "Connection to Agnes was lost. Please reload the session.";
const CONNECT_FAILED_MESSAGE: &str = "Could not connect to Agnes. Start the session again to retry.";

// ---------------------------------------------------------------------------
// SessionCommand
// ---------------------------------------------------------------------------

/// User-facing actions.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Start,
    /// Intentional end: teardown and hand the summary to collaborators.
    End,
    RequestScore,
    OpenScoreReview,
    CloseScoreReview,
    SetMuted(bool),
    ToggleMute,
    /// Push-to-talk key held (`true`) or released (`false`).
    PushToTalk(bool),
    /// A JPEG still frame from the embedder's camera.
    SendImage(Vec<u8>),
}

// ---------------------------------------------------------------------------
// SessionRunner
// ---------------------------------------------------------------------------

pub struct SessionRunner<C: CaptureDevice, P: PlaybackDevice> {
    config: AppConfig,
    ctx: Arc<SessionContext>,
    manager: SessionConnectionManager<C, P>,
    modes: Modes,
    vad: VoiceActivityMonitor,
    score: ScoreRequestProtocol,
    score_text: AgentTextMerger,
    reconnect: ReconnectionController,
    transcript: TranscriptAssembler,
    ui: SharedState,
    store: Option<Arc<dyn SessionStore>>,
    xp: Option<Arc<dyn XpCalculator>>,
    streak: StreakInfo,
    events: Option<mpsc::Receiver<AgentEvent>>,
    /// Set while a first (non-reconnect) link waits for `Opened`.
    open_deadline: Option<Instant>,
    frames: mpsc::Receiver<AudioFrame>,
    /// The trainee finished a turn and the agent has not answered yet.
    awaiting_reply: bool,
    last_image_at: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    ended: bool,
    record: Option<SessionRecord>,
}

impl<C: CaptureDevice, P: PlaybackDevice> SessionRunner<C, P> {
    pub fn new(
        config: AppConfig,
        capture: C,
        playback: P,
        connector: Arc<dyn AgentConnector>,
        collaborators: Collaborators,
        ui: SharedState,
    ) -> Result<Self, ScoreError> {
        let ctx = Arc::new(SessionContext::new());
        let (frames_tx, frames_rx) = mpsc::channel(config.audio.frame_queue.max(1));
        let pipeline = AudioPipeline::new(capture, playback, &config.audio, Arc::clone(&ctx));
        let manager = SessionConnectionManager::new(
            Arc::clone(&ctx),
            config.agent.clone(),
            connector,
            pipeline,
            frames_tx,
            collaborators.recorder,
        );
        let modes = if config.hotkey.push_to_talk {
            Modes::push_to_talk()
        } else {
            Modes::continuous()
        };

        Ok(Self {
            vad: VoiceActivityMonitor::new(config.vad.threshold, config.vad.silence_timeout()),
            score: ScoreRequestProtocol::new(config.scoring.clone(), ScoreRecognizers::new()?),
            score_text: AgentTextMerger::new(),
            reconnect: ReconnectionController::new(&config.reconnect),
            transcript: TranscriptAssembler::new(),
            ctx,
            manager,
            modes,
            ui,
            store: collaborators.store,
            xp: collaborators.xp,
            streak: collaborators.streak,
            events: None,
            open_deadline: None,
            frames: frames_rx,
            awaiting_reply: false,
            last_image_at: None,
            started_at: None,
            ended: false,
            record: None,
            config,
        })
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Run until [`SessionCommand::End`], a terminal error, or the command
    /// channel closing.  Returns the summary handed to collaborators.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> Option<SessionRecord> {
        let mut ticker = tokio::time::interval(self.config.vad.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !self.ended {
            let score_deadline = self.score.deadline();
            let reconnect_deadline = self.reconnect.deadline();
            let open_deadline = self.open_deadline;

            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        log::info!("session: command channel closed, ending");
                        self.end().await;
                    }
                },
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_event(event),
                    None => self.on_event_stream_ended(),
                },
                Some(frame) = self.frames.recv() => {
                    self.manager.send_frame(&frame, &self.modes);
                }
                _ = sleep_until_opt(score_deadline) => self.on_score_timeout(),
                _ = sleep_until_opt(open_deadline) => self.on_open_timeout(),
                _ = sleep_until_opt(reconnect_deadline) => self.on_reconnect_deadline().await,
                _ = ticker.tick() => self.on_vad_tick(),
            }

            self.refresh_activity();
        }

        log::info!("session: runner finished");
        self.record.take()
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn handle_command(&mut self, cmd: SessionCommand) {
        log::debug!("session: command {cmd:?}");
        match cmd {
            SessionCommand::Start => self.start().await,
            SessionCommand::End => self.end().await,
            SessionCommand::RequestScore => self.request_score(),
            SessionCommand::OpenScoreReview => {
                if self.modes.open_review() {
                    self.silence_vad(Instant::now());
                } else {
                    log::warn!("session: score review unavailable while scoring");
                }
            }
            SessionCommand::CloseScoreReview => self.modes.close_review(),
            SessionCommand::SetMuted(muted) => self.set_muted(muted),
            SessionCommand::ToggleMute => {
                let muted = !self.modes.muted;
                self.set_muted(muted);
            }
            SessionCommand::PushToTalk(true) => self.modes.press_to_talk(),
            SessionCommand::PushToTalk(false) => self.modes.release_to_talk(),
            SessionCommand::SendImage(jpeg) => self.send_image(jpeg),
        }
    }

    async fn start(&mut self) {
        if self.manager.is_closed() {
            log::warn!("session: already ended, start ignored");
            return;
        }
        if self.ctx.is_active() {
            log::debug!("session: already running");
            return;
        }
        self.ctx.activate();
        self.started_at.get_or_insert_with(Utc::now);
        self.with_ui(|ui| ui.clear_error());
        log::info!("session: starting {}", self.ctx.id());
        self.open_link().await;
    }

    async fn end(&mut self) {
        if self.ended {
            return;
        }
        let events = self.transcript.finish_turn();
        self.commit(events);

        let record = self.started_at.map(|started_at| self.build_record(started_at));
        self.shutdown();

        if let Some(record) = &record {
            log::info!(
                "session: ended after {}s, {} transcript entries, score {:?}",
                record.duration_secs,
                record.transcript.len(),
                record.score
            );
            publish_session(record, self.store.as_ref(), self.xp.as_ref(), &self.streak).await;
        }
        self.record = record;
    }

    fn set_muted(&mut self, muted: bool) {
        self.modes.set_muted(muted);
        self.with_ui(|ui| ui.muted = muted);
        if muted {
            self.silence_vad(Instant::now());
        }
    }

    fn send_image(&mut self, jpeg: Vec<u8>) {
        let video = &self.config.video;
        if !video.enabled {
            return;
        }
        let now = Instant::now();
        let interval = Duration::from_millis(video.frame_interval_ms);
        if let Some(last) = self.last_image_at {
            if now.duration_since(last) < interval {
                return;
            }
        }
        if self.manager.send_image(jpeg) {
            self.last_image_at = Some(now);
        }
    }

    fn request_score(&mut self) {
        if !self.manager.is_open() {
            self.with_ui(|ui| ui.set_error("Connect to Agnes before requesting a score."));
            return;
        }
        let now = Instant::now();
        let instruction = match self.score.begin(now) {
            Ok(instruction) => instruction,
            Err(e) => {
                log::warn!("scoring: {e}");
                return;
            }
        };

        self.manager.stop_all_playback();
        self.modes.begin_scoring();
        self.silence_vad(now);
        let events = self.transcript.finish_turn();
        self.commit(events);
        self.score_text = AgentTextMerger::new();
        self.with_ui(|ui| {
            ui.score = None;
            ui.score_feedback = None;
        });

        if let Err(e) = self.manager.send_text(instruction) {
            log::warn!("scoring: could not send request: {e}");
            self.score.reset();
            self.modes.abort_scoring();
            self.with_ui(|ui| ui.set_error(e.user_message()));
        }
    }

    // -----------------------------------------------------------------------
    // Link lifecycle
    // -----------------------------------------------------------------------

    async fn open_link(&mut self) {
        self.with_ui(|ui| ui.set_connection(ConnectionState::Connecting));
        let limit = Duration::from_millis(self.config.reconnect.open_timeout_ms);

        let result = match tokio::time::timeout(limit, self.manager.connect()).await {
            Ok(result) => result,
            Err(_) => {
                self.manager.abandon();
                Err(SessionError::Transport("connection attempt timed out".into()))
            }
        };

        match result {
            Ok(events) => {
                self.events = Some(events);
                // Reconnect attempts are timed by the controller.
                if !self.reconnect.is_reconnecting() {
                    self.open_deadline = Some(Instant::now() + limit);
                }
            }
            Err(e) => self.on_connect_failed(e),
        }
    }

    /// A first link was accepted but never confirmed the session.
    fn on_open_timeout(&mut self) {
        self.open_deadline = None;
        if self.manager.state() != ConnectionState::Connecting {
            return;
        }
        self.manager.abandon();
        self.events = None;
        self.on_connect_failed(SessionError::Transport("agent did not confirm the session in time".into()));
    }

    fn on_connect_failed(&mut self, err: SessionError) {
        self.open_deadline = None;
        let state = self.manager.state();
        self.with_ui(|ui| ui.set_connection(state));

        if err.is_terminal() {
            self.fail(err);
        } else if self.reconnect.is_reconnecting() {
            log::warn!("reconnect: attempt failed: {err}");
            let step = self.reconnect.on_attempt_failed(Instant::now());
            self.apply_step(step);
        } else {
            // First connect: report and let the user try again.
            log::error!("session: could not connect: {err}");
            self.ctx.deactivate();
            self.with_ui(|ui| ui.set_error(CONNECT_FAILED_MESSAGE));
        }
    }

    async fn on_reconnect_deadline(&mut self) {
        let step = self.reconnect.on_deadline(Instant::now());
        if self.manager.state() == ConnectionState::Connecting {
            // A link from the previous attempt never opened.
            self.manager.abandon();
            self.events = None;
        }
        match step {
            ReconnectStep::Connect(attempt) => {
                self.with_ui(|ui| {
                    ui.reconnecting = true;
                    ui.set_error(attempt.message());
                });
                self.open_link().await;
            }
            other => self.apply_step(other),
        }
    }

    fn apply_step(&mut self, step: ReconnectStep) {
        match step {
            ReconnectStep::Noop => {}
            ReconnectStep::Scheduled(attempt) | ReconnectStep::Connect(attempt) => {
                log::info!("reconnect: {}", attempt.message());
                self.with_ui(|ui| {
                    ui.reconnecting = true;
                    ui.set_error(attempt.message());
                });
            }
            ReconnectStep::GaveUp => {
                self.with_ui(|ui| ui.set_error(GAVE_UP_MESSAGE));
                self.shutdown();
            }
        }
    }

    fn on_link_lost(&mut self, err: SessionError) {
        if !self.ctx.is_active() {
            return;
        }
        log::warn!("session: link lost: {err}");
        self.events = None;
        let state = self.manager.state();
        self.with_ui(|ui| ui.set_connection(state));

        if self.score.is_active() {
            self.score.reset();
            self.score_text.finish();
            self.modes.abort_scoring();
        }
        let events = self.transcript.finish_turn();
        self.commit(events);

        let step = self.reconnect.on_link_lost(Instant::now());
        self.apply_step(step);
    }

    fn on_event_stream_ended(&mut self) {
        self.events = None;
        if self.ctx.is_active() && !self.manager.is_closed() {
            self.handle_event(AgentEvent::Closed {
                code: 1006,
                reason: "event stream ended".into(),
            });
        }
    }

    /// Terminal failure: surface it and tear everything down.
    fn fail(&mut self, err: SessionError) {
        log::error!("session: terminal error: {err}");
        self.with_ui(|ui| ui.set_error(err.user_message()));
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.manager.close();
        self.score.reset();
        self.reconnect.reset();
        self.vad.reset();
        self.events = None;
        self.open_deadline = None;
        self.ended = true;
        self.with_ui(|ui| {
            ui.set_connection(ConnectionState::Closed);
            ui.activity = ActivityState::Idle;
            ui.reconnecting = false;
            ui.level.clear();
        });
    }

    // -----------------------------------------------------------------------
    // Inbound events
    // -----------------------------------------------------------------------

    fn handle_event(&mut self, event: AgentEvent) {
        log::trace!("session: event {}", event.kind());
        match self.manager.on_event(event) {
            Dispatch::Opened => self.on_opened(),
            Dispatch::Interrupted => self.on_interrupted(),
            Dispatch::Content(event) => self.route_content(event),
            Dispatch::Lost(err) => self.on_link_lost(err),
            Dispatch::Refused(err) => {
                self.events = None;
                self.on_connect_failed(err);
            }
            Dispatch::Failed(err) => self.fail(err),
            Dispatch::Closed | Dispatch::Ignored => {}
        }
    }

    fn on_opened(&mut self) {
        self.open_deadline = None;
        let recovered = self.reconnect.on_opened();
        self.with_ui(|ui| {
            ui.set_connection(ConnectionState::Open);
            ui.reconnecting = false;
            ui.clear_error();
        });
        if recovered {
            log::info!("session: reconnected");
        }
    }

    fn on_interrupted(&mut self) {
        self.awaiting_reply = false;
        if self.score.is_active() {
            return;
        }
        let events = self.transcript.finish_turn();
        self.commit(events);
    }

    fn route_content(&mut self, event: AgentEvent) {
        let now = Instant::now();
        if self.score.is_active() {
            self.route_score(event, now);
            return;
        }

        match event {
            AgentEvent::InputTranscription { text, is_final } => {
                let events = self.transcript.on_user(&text, is_final);
                self.commit(events);
            }
            AgentEvent::ModelText(text) => self.on_agent_text(&text, true, now),
            AgentEvent::OutputTranscription(text) => self.on_agent_text(&text, false, now),
            AgentEvent::Audio(bytes) => {
                self.awaiting_reply = false;
                self.manager.play_audio(&bytes);
            }
            AgentEvent::TurnComplete => {
                let events = self.transcript.finish_turn();
                self.commit(events);
            }
            _ => {}
        }
    }

    fn on_agent_text(&mut self, text: &str, from_model: bool, now: Instant) {
        self.awaiting_reply = false;
        let events = self.transcript.on_agent(text, from_model);
        self.commit(events);
        self.check_session_ending(from_model, now);
    }

    /// The agent may announce the end of the session on its own; that
    /// starts a score request without an instruction turn.
    fn check_session_ending(&mut self, from_model: bool, now: Instant) {
        if self.modes.conversation != ConversationMode::Live {
            return;
        }
        let seed = self.transcript.agent_text().to_string();
        if !self.score.recognizers().is_session_ending(&seed) {
            return;
        }

        self.manager.stop_all_playback();
        self.modes.begin_scoring();
        self.silence_vad(now);
        let events = self.transcript.finish_turn();
        self.commit(events);

        self.score_text = AgentTextMerger::new();
        let seed = if from_model {
            self.score_text.on_model_text(&seed)
        } else {
            self.score_text.on_transcription(&seed)
        }
        .unwrap_or_default();

        match self.score.begin_implicit(now, &seed) {
            Ok(Some(result)) => self.finish_score(result),
            Ok(None) => {}
            Err(e) => log::warn!("scoring: {e}"),
        }
    }

    /// Score request in flight: everything goes to the accumulator or is
    /// swallowed.
    fn route_score(&mut self, event: AgentEvent, now: Instant) {
        let result = match event {
            AgentEvent::ModelText(text) => self
                .score_text
                .on_model_text(&text)
                .and_then(|delta| self.score.on_delta(&delta, now)),
            AgentEvent::OutputTranscription(text) => self
                .score_text
                .on_transcription(&text)
                .and_then(|delta| self.score.on_delta(&delta, now)),
            AgentEvent::TurnComplete => {
                let result = self.score.on_turn_complete();
                self.score_text.finish();
                result
            }
            other => {
                log::trace!("scoring: swallowed {} during score request", other.kind());
                None
            }
        };
        if let Some(result) = result {
            self.finish_score(result);
        }
    }

    fn finish_score(&mut self, result: ScoreResult) {
        self.score_text.finish();
        self.modes.finish_scoring();
        self.with_ui(|ui| {
            ui.score = Some(result.score);
            ui.score_feedback = Some(result.text);
            ui.clear_error();
        });
    }

    fn on_score_timeout(&mut self) {
        if let Some(err) = self.score.poll_timeout(Instant::now()) {
            self.score_text.finish();
            self.modes.abort_scoring();
            self.with_ui(|ui| ui.set_error(err.user_message()));
        }
    }

    // -----------------------------------------------------------------------
    // Voice activity
    // -----------------------------------------------------------------------

    fn on_vad_tick(&mut self) {
        let analysis = self.manager.pipeline().analysis();
        let magnitude = analysis.magnitude();
        let level = analysis.level(LEVEL_BARS);

        let suppressed = self.modes.vad_suppressed();
        if let Some(t) = self.vad.tick(magnitude, suppressed, Instant::now()) {
            self.apply_vad(t);
        }
        self.with_ui(|ui| ui.level = level.bars);
    }

    /// Force the monitor silent right now instead of on the next tick.
    fn silence_vad(&mut self, now: Instant) {
        if let Some(t) = self.vad.tick(0.0, true, now) {
            self.apply_vad(t);
        }
    }

    fn apply_vad(&mut self, transition: VoiceTransition) {
        log::debug!("vad: {transition:?}");
        match transition {
            VoiceTransition::StartedSpeaking => self.awaiting_reply = false,
            VoiceTransition::StoppedSpeaking => self.awaiting_reply = self.manager.is_open(),
            VoiceTransition::Silenced => {}
        }
    }

    // -----------------------------------------------------------------------
    // UI state
    // -----------------------------------------------------------------------

    fn commit(&mut self, events: Vec<TranscriptEvent>) {
        for event in events {
            if !event.is_final {
                log::trace!("transcript: {} +{:?}", event.speaker.label(), event.text);
                continue;
            }
            if event.speaker == Speaker::User {
                self.awaiting_reply = true;
            }
            log::debug!("transcript: {}: {}", event.speaker.label(), event.text);
            let entry = TranscriptEntry::new(event.speaker, event.text);
            self.with_ui(|ui| ui.transcript.push(entry));
        }
    }

    fn refresh_activity(&mut self) {
        let activity = if self.ended || !self.ctx.is_active() {
            ActivityState::Idle
        } else if self.score.is_active() {
            ActivityState::Scoring
        } else if self.manager.pipeline_mut().is_playing() {
            ActivityState::Responding
        } else if self.vad.is_speaking() {
            ActivityState::Listening
        } else if self.awaiting_reply {
            ActivityState::Thinking
        } else {
            ActivityState::Idle
        };
        self.with_ui(|ui| {
            if ui.activity != activity {
                log::debug!("session: activity {} → {}", ui.activity.label(), activity.label());
                ui.activity = activity;
            }
        });
    }

    fn with_ui(&self, f: impl FnOnce(&mut UiState)) {
        if let Ok(mut ui) = self.ui.lock() {
            f(&mut ui);
        }
    }

    fn build_record(&self, started_at: DateTime<Utc>) -> SessionRecord {
        let ended_at = Utc::now();
        let (transcript, score, feedback) = self
            .ui
            .lock()
            .map(|ui| (ui.transcript.clone(), ui.score, ui.score_feedback.clone()))
            .unwrap_or_default();
        SessionRecord {
            id: self.ctx.id(),
            started_at,
            ended_at,
            duration_secs: (ended_at - started_at).num_seconds().max(0) as u64,
            transcript,
            score,
            feedback,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn modes(&self) -> Modes {
        self.modes
    }

    pub fn shared_state(&self) -> SharedState {
        Arc::clone(&self.ui)
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<AgentEvent>>) -> Option<AgentEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::encode_pcm16;
    use crate::session::event::Outbound;
    use crate::session::state::new_shared_state;
    use crate::session::testing::{FakeCapture, FakePlayback, ManualClock, ScriptedConnector};
    use std::sync::Mutex;

    struct Harness {
        runner: SessionRunner<FakeCapture, FakePlayback>,
        connector: ScriptedConnector,
        capture: FakeCapture,
        playback: FakePlayback,
        ui: SharedState,
    }

    fn harness_with(config: AppConfig, collaborators: Collaborators) -> Harness {
        let connector = ScriptedConnector::new();
        let capture = FakeCapture::new();
        let playback = FakePlayback::new(ManualClock::new(), 24_000);
        let ui = new_shared_state();
        let runner = SessionRunner::new(
            config,
            capture.clone(),
            playback.clone(),
            Arc::new(connector.clone()),
            collaborators,
            Arc::clone(&ui),
        )
        .unwrap();
        Harness {
            runner,
            connector,
            capture,
            playback,
            ui,
        }
    }

    fn harness() -> Harness {
        let mut config = AppConfig::default();
        config.audio.block_size = 4;
        harness_with(config, Collaborators::default())
    }

    /// Handle every event currently queued on the link.
    fn drain(h: &mut Harness) {
        loop {
            let event = match h.runner.events.as_mut() {
                Some(rx) => rx.try_recv().ok(),
                None => None,
            };
            match event {
                Some(event) => h.runner.handle_event(event),
                None => break,
            }
        }
    }

    fn pump_frames(h: &mut Harness) {
        while let Ok(frame) = h.runner.frames.try_recv() {
            h.runner.manager.send_frame(&frame, &h.runner.modes);
        }
    }

    async fn started(h: &mut Harness) {
        h.runner.handle_command(SessionCommand::Start).await;
        drain(h);
        assert!(h.ui.lock().unwrap().connected);
    }

    fn agent(h: &mut Harness, event: AgentEvent) {
        h.connector.last_link().inject(event);
        drain(h);
    }

    fn one_second() -> Vec<u8> {
        encode_pcm16(&vec![0.1; 24_000])
    }

    #[tokio::test(start_paused = true)]
    async fn start_opens_link_and_streams_microphone() {
        let mut h = harness();
        started(&mut h).await;

        h.capture.feed(&[0.3; 8]);
        pump_frames(&mut h);

        let link = h.connector.last_link();
        assert_eq!(link.sent_audio(), 2);
        assert!(matches!(&link.sent()[0], Outbound::Audio { sample_rate: 16_000, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn three_chunks_play_back_to_back() {
        let mut h = harness();
        started(&mut h).await;
        for _ in 0..3 {
            agent(&mut h, AgentEvent::Audio(one_second()));
        }

        let chunks = h.playback.scheduled();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].scheduled_start, 0.0);
        assert!((chunks[2].end() - 3.0).abs() < 1e-9);
        h.runner.refresh_activity();
        assert_eq!(h.ui.lock().unwrap().activity, ActivityState::Responding);
    }

    #[tokio::test(start_paused = true)]
    async fn interruption_discards_queued_audio_and_restarts_at_now() {
        let mut h = harness();
        started(&mut h).await;
        agent(&mut h, AgentEvent::Audio(one_second()));
        agent(&mut h, AgentEvent::Audio(one_second()));
        h.playback.clock().advance(0.25);

        // interruption and fresh audio in the same inbound frame
        let link = h.connector.last_link();
        link.inject(AgentEvent::Interrupted);
        link.inject(AgentEvent::Audio(one_second()));
        drain(&mut h);

        let chunks = h.playback.scheduled();
        assert_eq!(h.playback.active_chunks(), 1);
        assert!((chunks[2].scheduled_start - 0.25).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn transcript_prefers_model_text_and_finalizes_on_turn_complete() {
        let mut h = harness();
        started(&mut h).await;

        agent(&mut h, AgentEvent::InputTranscription { text: "What's the price?".into(), is_final: false });
        agent(&mut h, AgentEvent::ModelText("It's ".into()));
        agent(&mut h, AgentEvent::OutputTranscription("It is".into()));
        agent(&mut h, AgentEvent::ModelText("ten dollars.".into()));
        agent(&mut h, AgentEvent::TurnComplete);

        let ui = h.ui.lock().unwrap();
        let lines: Vec<(Speaker, &str)> = ui.transcript.iter().map(|e| (e.speaker, e.text.as_str())).collect();
        assert_eq!(
            lines,
            vec![(Speaker::User, "What's the price?"), (Speaker::Agent, "It's ten dollars.")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn score_request_isolates_conversation() {
        let mut h = harness();
        started(&mut h).await;
        agent(&mut h, AgentEvent::Audio(one_second()));
        let transcript_before = h.ui.lock().unwrap().transcript.len();

        h.runner.handle_command(SessionCommand::RequestScore).await;
        assert_eq!(h.playback.active_chunks(), 0);
        assert_eq!(h.connector.last_link().sent_texts().len(), 1);
        assert!(h.connector.last_link().sent_texts()[0].contains("AGNES SCORE"));

        // mic frames are held back while scoring
        h.capture.feed(&[0.3; 8]);
        pump_frames(&mut h);
        assert_eq!(h.connector.last_link().sent_audio(), 0);

        agent(&mut h, AgentEvent::Audio(one_second()));
        agent(&mut h, AgentEvent::InputTranscription { text: "hmm".into(), is_final: true });
        agent(&mut h, AgentEvent::ModelText("AGNES SCORE: 87. ".into()));
        h.runner.refresh_activity();
        assert_eq!(h.ui.lock().unwrap().activity, ActivityState::Scoring);
        agent(&mut h, AgentEvent::ModelText("Strong rapport. Good luck!".into()));

        assert_eq!(h.playback.scheduled().len(), 1, "score audio must not play");
        let ui = h.ui.lock().unwrap();
        assert_eq!(ui.transcript.len(), transcript_before);
        assert_eq!(ui.score, Some(87));
        assert!(ui.score_feedback.as_deref().unwrap_or("").contains("Strong rapport"));
        drop(ui);
        assert_eq!(h.runner.modes().conversation, ConversationMode::Reviewing);
    }

    #[tokio::test(start_paused = true)]
    async fn second_score_request_is_ignored() {
        let mut h = harness();
        started(&mut h).await;
        h.runner.handle_command(SessionCommand::RequestScore).await;
        h.runner.handle_command(SessionCommand::RequestScore).await;
        assert_eq!(h.connector.last_link().sent_texts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn score_timeout_recovers_conversation() {
        let mut h = harness();
        started(&mut h).await;
        h.runner.handle_command(SessionCommand::RequestScore).await;
        agent(&mut h, AgentEvent::ModelText("Let me think about that".into()));

        tokio::time::advance(Duration::from_secs(91)).await;
        h.runner.on_score_timeout();

        let ui = h.ui.lock().unwrap();
        assert!(ui.error_message.as_deref().unwrap_or("").contains("timed out"));
        assert!(ui.connected);
        drop(ui);
        assert_eq!(h.runner.modes().conversation, ConversationMode::Live);

        // microphone flows again
        h.capture.feed(&[0.3; 4]);
        pump_frames(&mut h);
        assert_eq!(h.connector.last_link().sent_audio(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn score_request_silences_speaking_trainee() {
        let mut h = harness();
        started(&mut h).await;
        h.capture.feed(&[0.5; 64]);
        h.runner.on_vad_tick();
        assert!(h.runner.vad.is_speaking());

        h.runner.handle_command(SessionCommand::RequestScore).await;
        assert!(!h.runner.vad.is_speaking());

        for _ in 0..20 {
            h.capture.feed(&[0.5; 64]);
            h.runner.on_vad_tick();
            assert!(!h.runner.vad.is_speaking());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn agent_announcing_the_end_triggers_scoring() {
        let mut h = harness();
        started(&mut h).await;

        agent(&mut h, AgentEvent::ModelText("Your offer would score well with me.".into()));
        assert_eq!(h.runner.modes().conversation, ConversationMode::Live);
        agent(&mut h, AgentEvent::TurnComplete);

        agent(&mut h, AgentEvent::ModelText("Great work. That concludes our session. ".into()));
        assert_eq!(h.runner.modes().conversation, ConversationMode::Scoring);
        agent(&mut h, AgentEvent::ModelText("AGNES SCORE: 90.".into()));
        agent(&mut h, AgentEvent::TurnComplete);

        assert_eq!(h.ui.lock().unwrap().score, Some(90));
        assert_eq!(h.runner.modes().conversation, ConversationMode::Reviewing);
        assert!(h.connector.last_link().sent_texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_one_failed_attempt() {
        let mut h = harness();
        started(&mut h).await;
        h.connector.push_failure(SessionError::Transport("refused".into()));

        agent(&mut h, AgentEvent::Closed { code: 1011, reason: "internal".into() });
        {
            let ui = h.ui.lock().unwrap();
            assert!(ui.reconnecting);
            assert!(!ui.connected);
            assert!(ui.error_message.as_deref().unwrap_or("").contains("(1/3)"));
        }

        tokio::time::advance(Duration::from_secs(2)).await;
        h.runner.on_reconnect_deadline().await;
        assert_eq!(h.connector.connect_count(), 2);
        assert!(h.ui.lock().unwrap().error_message.as_deref().unwrap_or("").contains("(2/3)"));

        tokio::time::advance(Duration::from_secs(2)).await;
        h.runner.on_reconnect_deadline().await;
        drain(&mut h);

        assert_eq!(h.connector.connect_count(), 3);
        assert_eq!(h.runner.reconnect.attempt_count(), 0);
        let ui = h.ui.lock().unwrap();
        assert!(ui.connected);
        assert!(!ui.reconnecting);
        assert!(ui.error_message.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let mut h = harness();
        started(&mut h).await;
        for _ in 0..3 {
            h.connector.push_failure(SessionError::Transport("refused".into()));
        }

        agent(&mut h, AgentEvent::Closed { code: 1006, reason: String::new() });
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(2)).await;
            h.runner.on_reconnect_deadline().await;
        }

        assert_eq!(h.connector.connect_count(), 4);
        assert!(h.runner.ended);
        assert!(h.runner.reconnect.deadline().is_none());
        assert!(h.capture.is_released());
        let ui = h.ui.lock().unwrap();
        assert_eq!(ui.error_message.as_deref(), Some(GAVE_UP_MESSAGE));
        assert!(!ui.reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn link_that_never_opens_times_out_into_next_attempt() {
        let mut h = harness();
        started(&mut h).await;
        agent(&mut h, AgentEvent::Closed { code: 1006, reason: String::new() });
        h.connector.manual_open();

        tokio::time::advance(Duration::from_secs(2)).await;
        h.runner.on_reconnect_deadline().await;
        assert_eq!(h.runner.manager.state(), ConnectionState::Connecting);

        tokio::time::advance(Duration::from_secs(10)).await;
        h.runner.on_reconnect_deadline().await;
        assert!(h.connector.last_link().is_closed());
        assert_eq!(h.runner.reconnect.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_is_terminal() {
        let mut h = harness();
        h.connector.push_failure(SessionError::Auth("401".into()));
        h.runner.handle_command(SessionCommand::Start).await;

        assert!(h.runner.ended);
        assert_eq!(h.connector.connect_count(), 1);
        assert!(h.ui.lock().unwrap().error_message.as_deref().unwrap_or("").contains("credentials"));
    }

    #[tokio::test(start_paused = true)]
    async fn first_connect_failure_can_be_retried_by_user() {
        let mut h = harness();
        h.connector.push_failure(SessionError::Transport("dns".into()));
        h.runner.handle_command(SessionCommand::Start).await;
        assert!(!h.runner.ended);
        assert!(!h.runner.context().is_active());

        h.runner.handle_command(SessionCommand::Start).await;
        drain(&mut h);
        assert!(h.ui.lock().unwrap().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn first_link_without_setup_complete_times_out() {
        let mut h = harness();
        h.connector.manual_open();
        h.runner.handle_command(SessionCommand::Start).await;
        assert_eq!(h.runner.manager.state(), ConnectionState::Connecting);
        assert!(h.runner.open_deadline.is_some());

        tokio::time::advance(Duration::from_secs(10)).await;
        h.runner.on_open_timeout();

        assert!(h.connector.last_link().is_closed());
        assert!(!h.runner.ended);
        assert!(!h.runner.context().is_active());
        assert!(!h.runner.reconnect.is_reconnecting());
        assert_eq!(h.connector.connect_count(), 1);
        let ui = h.ui.lock().unwrap();
        assert_eq!(ui.connection, ConnectionState::Error);
        assert_eq!(ui.error_message.as_deref(), Some(CONNECT_FAILED_MESSAGE));
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_gives_up_on_a_silent_first_link() {
        let h = harness();
        h.connector.manual_open();
        let connector = h.connector.clone();
        let ui = Arc::clone(&h.ui);
        let (tx, rx) = mpsc::channel(8);

        let driver = async move {
            tx.send(SessionCommand::Start).await.unwrap();
            tokio::time::sleep(Duration::from_secs(11)).await;
            {
                let ui = ui.lock().unwrap();
                assert_eq!(ui.connection, ConnectionState::Error);
                assert_eq!(ui.error_message.as_deref(), Some(CONNECT_FAILED_MESSAGE));
            }
            assert_eq!(connector.connect_count(), 1);
            tx.send(SessionCommand::End).await.unwrap();
        };

        let (record, ()) = tokio::join!(h.runner.run(rx), driver);
        assert!(record.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn first_link_closing_before_open_is_not_retried() {
        let mut h = harness();
        h.connector.manual_open();
        h.runner.handle_command(SessionCommand::Start).await;

        agent(&mut h, AgentEvent::Closed { code: 1008, reason: "policy".into() });

        assert!(!h.runner.reconnect.is_reconnecting());
        assert!(h.runner.open_deadline.is_none());
        assert!(!h.runner.context().is_active());
        assert!(!h.runner.ended);
        assert_eq!(
            h.ui.lock().unwrap().error_message.as_deref(),
            Some(CONNECT_FAILED_MESSAGE)
        );

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(h.connector.connect_count(), 1);

        // the user may start again
        h.runner.handle_command(SessionCommand::Start).await;
        agent(&mut h, AgentEvent::Opened);
        assert_eq!(h.connector.connect_count(), 2);
        assert!(h.ui.lock().unwrap().connected);
        assert!(h.ui.lock().unwrap().error_message.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn muting_stops_transmission_and_voice_detection() {
        let mut h = harness();
        started(&mut h).await;
        h.capture.feed(&[0.5; 64]);
        h.runner.on_vad_tick();
        pump_frames(&mut h);
        let sent = h.connector.last_link().sent_audio();

        h.runner.handle_command(SessionCommand::ToggleMute).await;
        assert!(!h.runner.vad.is_speaking());
        h.capture.feed(&[0.5; 64]);
        pump_frames(&mut h);
        assert_eq!(h.connector.last_link().sent_audio(), sent);
        assert!(h.ui.lock().unwrap().muted);
    }

    #[tokio::test(start_paused = true)]
    async fn push_to_talk_gates_frames() {
        let mut config = AppConfig::default();
        config.audio.block_size = 4;
        config.hotkey.push_to_talk = true;
        let mut h = harness_with(config, Collaborators::default());
        started(&mut h).await;

        h.capture.feed(&[0.2; 4]);
        pump_frames(&mut h);
        assert_eq!(h.connector.last_link().sent_audio(), 0);

        h.runner.handle_command(SessionCommand::PushToTalk(true)).await;
        h.capture.feed(&[0.2; 4]);
        pump_frames(&mut h);
        assert_eq!(h.connector.last_link().sent_audio(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn images_are_rate_limited() {
        let mut h = harness();
        started(&mut h).await;
        h.runner.handle_command(SessionCommand::SendImage(vec![0xff, 0xd8])).await;
        h.runner.handle_command(SessionCommand::SendImage(vec![0xff, 0xd8])).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        h.runner.handle_command(SessionCommand::SendImage(vec![0xff, 0xd8])).await;

        let images = h
            .connector
            .last_link()
            .sent()
            .iter()
            .filter(|m| matches!(m, Outbound::Image(_)))
            .count();
        assert_eq!(images, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn review_suppresses_voice_detection() {
        let mut h = harness();
        started(&mut h).await;
        h.runner.handle_command(SessionCommand::OpenScoreReview).await;
        h.capture.feed(&[0.5; 64]);
        h.runner.on_vad_tick();
        assert!(!h.runner.vad.is_speaking());

        h.runner.handle_command(SessionCommand::CloseScoreReview).await;
        h.runner.on_vad_tick();
        assert!(h.runner.vad.is_speaking());
    }

    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<Vec<SessionRecord>>,
    }

    #[async_trait::async_trait]
    impl SessionStore for RecordingStore {
        async fn save_session(&self, record: &SessionRecord) -> Result<(), crate::collab::CollabError> {
            self.saved.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn update_session(
            &self,
            _id: uuid::Uuid,
            _patch: crate::collab::SessionPatch,
        ) -> Result<(), crate::collab::CollabError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn end_tears_down_and_publishes_once() {
        let store = Arc::new(RecordingStore::default());
        let mut config = AppConfig::default();
        config.audio.block_size = 4;
        let collaborators = Collaborators {
            store: Some(store.clone()),
            ..Collaborators::default()
        };
        let mut h = harness_with(config, collaborators);
        started(&mut h).await;
        agent(&mut h, AgentEvent::InputTranscription { text: "Hi Agnes".into(), is_final: true });
        agent(&mut h, AgentEvent::Audio(one_second()));

        h.runner.handle_command(SessionCommand::End).await;
        h.runner.handle_command(SessionCommand::End).await;
        drain(&mut h);

        assert!(!h.runner.context().is_active());
        assert_eq!(h.playback.active_chunks(), 0);
        assert!(h.connector.last_link().is_closed());
        assert!(h.capture.is_released());
        assert!(h.playback.is_released());

        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].transcript[0].text, "Hi Agnes");
        assert_eq!(saved[0].id, h.runner.context().id());
        assert!(!h.ui.lock().unwrap().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_drives_a_whole_session() {
        let h = harness();
        let link_source = h.connector.clone();
        let ui = Arc::clone(&h.ui);
        let (tx, rx) = mpsc::channel(8);

        let driver = async move {
            tx.send(SessionCommand::Start).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(ui.lock().unwrap().connected);

            link_source.last_link().inject(AgentEvent::ModelText("Hello, I'm the buyer.".into()));
            link_source.last_link().inject(AgentEvent::TurnComplete);
            tokio::time::sleep(Duration::from_millis(100)).await;

            tx.send(SessionCommand::End).await.unwrap();
        };

        let (record, ()) = tokio::join!(h.runner.run(rx), driver);
        let record = record.unwrap();
        assert_eq!(record.transcript.len(), 1);
        assert_eq!(record.transcript[0].speaker, Speaker::Agent);
    }
}
