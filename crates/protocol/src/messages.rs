//! Wire message types for the voice relay (spec.md §6).
//!
//! Each direction gets its own `#[serde(tag = "type")]` enum, grounded in
//! `sa_protocol::WsMessage`'s internally-tagged enum shape — but here split
//! three ways (client→server, server→client, upstream→relay) instead of one
//! shared envelope, since the three directions don't share a vocabulary.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared small types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Learner,
    Agent,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Learner => "learner",
            Speaker::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    UserEnded,
    Timeout,
    Error,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Listening,
    Thinking,
    Speaking,
    Waiting,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → server (learner → relay), text frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfigPayload {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default, rename = "sampleRate")]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "session.start")]
    SessionStart {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(default, rename = "audioConfig")]
        audio_config: Option<AudioConfigPayload>,
    },
    #[serde(rename = "session.stop")]
    SessionStop {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(default)]
        reason: Option<EndReason>,
    },
    #[serde(rename = "session.config")]
    SessionConfig {
        #[serde(rename = "sessionId")]
        session_id: String,
        config: vrelay_domain::config::SessionConfigPatch,
    },
    #[serde(rename = "session.interrupt")]
    SessionInterrupt {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename = "session.transcript")]
    SessionTranscript {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server → client (relay → learner), text frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(rename = "durationMs")]
    pub duration_ms: i64,
    #[serde(rename = "turnCount")]
    pub turn_count: u32,
    #[serde(rename = "averagePronunciation", skip_serializing_if = "Option::is_none")]
    pub average_pronunciation: Option<f32>,
    #[serde(rename = "averageGrammar", skip_serializing_if = "Option::is_none")]
    pub average_grammar: Option<f32>,
    #[serde(rename = "averageFluency", skip_serializing_if = "Option::is_none")]
    pub average_fluency: Option<f32>,
    #[serde(rename = "topIssues")]
    pub top_issues: Vec<String>,
    #[serde(rename = "competenciesUpdated")]
    pub competencies_updated: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session.ready")]
    SessionReady {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "agentId")]
        agent_id: String,
    },
    #[serde(rename = "turn.start")]
    TurnStart {
        speaker: Speaker,
        sequence: u32,
        #[serde(rename = "turnId")]
        turn_id: String,
    },
    #[serde(rename = "turn.end")]
    TurnEnd {
        speaker: Speaker,
        sequence: u32,
        #[serde(rename = "turnId")]
        turn_id: String,
    },
    #[serde(rename = "transcript")]
    Transcript {
        speaker: Speaker,
        text: String,
        #[serde(rename = "isFinal")]
        is_final: bool,
        #[serde(skip_serializing_if = "Option::is_none", rename = "turnId")]
        turn_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    #[serde(rename = "assessment")]
    Assessment {
        #[serde(rename = "turnId")]
        turn_id: String,
        #[serde(rename = "overallPronunciation")]
        overall_pronunciation: f32,
        #[serde(rename = "overallFluency")]
        overall_fluency: f32,
        #[serde(rename = "overallGrammar")]
        overall_grammar: f32,
        issues: Vec<String>,
    },
    #[serde(rename = "pronunciation.feedback")]
    PronunciationFeedback {
        #[serde(rename = "turnId")]
        turn_id: String,
        word: String,
        score: f32,
    },
    #[serde(rename = "agent.state")]
    AgentStateMsg { state: AgentState },
    #[serde(rename = "session.end")]
    SessionEnd {
        reason: EndReason,
        summary: SessionSummary,
    },
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        recoverable: bool,
        #[serde(skip_serializing_if = "Option::is_none", rename = "sessionId")]
        session_id: Option<String>,
    },
    #[serde(rename = "pong")]
    Pong {
        timestamp: i64,
        #[serde(rename = "serverTimestamp")]
        server_timestamp: i64,
        #[serde(rename = "latencyMs")]
        latency_ms: i64,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream → relay, text frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UpstreamMessage {
    #[serde(rename = "audio")]
    Audio {
        #[serde(default, rename = "sampleRate")]
        sample_rate: Option<u32>,
    },
    #[serde(rename = "agent_response")]
    AgentResponse {
        text: String,
        #[serde(default, rename = "is_final")]
        is_final: bool,
    },
    #[serde(rename = "transcript")]
    Transcript {
        text: String,
        #[serde(default, rename = "is_final")]
        is_final: bool,
    },
    #[serde(rename = "user_transcript")]
    UserTranscript {
        text: String,
        #[serde(default, rename = "is_final")]
        is_final: bool,
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        confidence: Option<f32>,
    },
    #[serde(rename = "interruption")]
    Interruption {},
    #[serde(rename = "turn_end")]
    TurnEnd {},
    #[serde(rename = "end")]
    End {},
}

/// The literal JSON text of the only server-originated frame sent upstream
/// (spec.md §4.6, §6) — a fixed, fieldless envelope, so a constant is
/// simpler than round-tripping it through serde.
pub const INTERRUPT_FRAME: &str = r#"{"type":"interrupt"}"#;
