//! Messages exchanged with the agent link, in decoded form.

/// One decoded inbound event from the remote agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// The agent accepted the session setup.
    Opened,
    /// Discard in-flight agent speech immediately.
    Interrupted,
    /// Structured text part of the model's turn.
    ModelText(String),
    /// Transcription of the agent's spoken output.
    OutputTranscription(String),
    /// Transcription of the trainee's microphone input.
    InputTranscription { text: String, is_final: bool },
    /// PCM16 LE agent speech at the output rate.
    Audio(Vec<u8>),
    TurnComplete,
    /// The server announced it will close soon.
    GoAway,
    /// The link is gone.  Emitted exactly once per connection.
    Closed { code: u16, reason: String },
}

impl AgentEvent {
    /// Short name for logging; never includes payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Opened => "opened",
            AgentEvent::Interrupted => "interrupted",
            AgentEvent::ModelText(_) => "model_text",
            AgentEvent::OutputTranscription(_) => "output_transcription",
            AgentEvent::InputTranscription { .. } => "input_transcription",
            AgentEvent::Audio(_) => "audio",
            AgentEvent::TurnComplete => "turn_complete",
            AgentEvent::GoAway => "go_away",
            AgentEvent::Closed { .. } => "closed",
        }
    }
}

/// One outbound message to the remote agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// PCM16 LE microphone audio at the input rate.
    Audio { pcm: Vec<u8>, sample_rate: u32 },
    /// A JPEG still frame.
    Image(Vec<u8>),
    /// A complete one-shot user text turn.
    Text(String),
}
