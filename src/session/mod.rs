//! # Session Management
//!
//! One `VoiceSession` exists per open WebSocket connection. It owns the
//! conversation history, the active agent variant, the utterance state
//! machine, and the audio accumulator. The session object is owned
//! exclusively by its connection's actor — nothing else ever holds a
//! reference to it — so its methods take `&mut self` and need no locking.
//!
//! ## Session Lifecycle (utterance state machine):
//! 1. **Idle**: no active utterance; control frames accepted
//! 2. **Recording**: audio fragments accumulating (entered on first append)
//! 3. **Committed**: utterance sealed, handed to the pipeline
//! 4. **Responding**: response frames streaming back to the client
//! 5. back to **Idle** when the turn completes — or **Closed**, terminal,
//!    on transport loss from any state
//!
//! History replacement is orthogonal: it may arrive in any phase and is
//! applied without touching the audio machine.
//!
//! The process-wide [`SessionRegistry`] tracks which sessions exist so the
//! server can enforce its concurrent-session limit and report activity; it
//! holds metadata only, never the session itself.

use crate::agent::profile::AgentProfile;
use crate::audio::buffer::{AudioAssembler, AudioClip};
use crate::config::AudioConfig;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Who produced a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One exchange unit in the conversation history.
///
/// The same shape travels both directions: the client syncs prior turns with
/// `history.update`, and the server sends the full list back in every
/// `history.updated` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    /// Spoken or typed message from either side
    Message { role: Role, content: String },

    /// A structured call the agent issued mid-turn
    FunctionCall {
        name: String,
        arguments: serde_json::Value,
    },

    /// The dispatcher's result for the preceding call
    FunctionResult {
        name: String,
        output: serde_json::Value,
    },
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Turn {
        Turn::Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Turn {
        Turn::Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Whether this is a user-authored message (drives the text-input path).
    pub fn is_user_message(&self) -> bool {
        matches!(
            self,
            Turn::Message {
                role: Role::User,
                ..
            }
        )
    }
}

/// Phase of the per-session utterance state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Recording,
    Committed,
    Responding,
    Closed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Recording => "recording",
            SessionPhase::Committed => "committed",
            SessionPhase::Responding => "responding",
            SessionPhase::Closed => "closed",
        }
    }
}

/// State for one live voice session.
pub struct VoiceSession {
    pub session_id: String,
    pub user_id: String,

    /// Agent variant currently answering; swapped on handoff
    pub agent: AgentProfile,

    /// Ordered conversation history
    pub history: Vec<Turn>,

    phase: SessionPhase,

    /// Accumulator for the in-flight utterance
    assembler: AudioAssembler,

    pub connected_at: DateTime<Utc>,
}

impl VoiceSession {
    pub fn new(session_id: String, user_id: String, audio: &AudioConfig) -> Self {
        Self {
            session_id,
            user_id,
            agent: AgentProfile::default(),
            history: Vec::new(),
            phase: SessionPhase::Idle,
            assembler: AudioAssembler::new(audio),
            connected_at: Utc::now(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    /// Accept one decoded PCM fragment.
    ///
    /// ## State Transition:
    /// `Idle -> Recording` on the first fragment; `Recording` stays put.
    /// Fragments during `Committed`/`Responding` are rejected — a response
    /// is in flight and the protocol has no interleaving.
    pub fn append_audio(&mut self, data: &[u8]) -> AppResult<()> {
        match self.phase {
            SessionPhase::Idle => {
                self.assembler.append(data)?;
                self.phase = SessionPhase::Recording;
                Ok(())
            }
            SessionPhase::Recording => self.assembler.append(data),
            SessionPhase::Committed | SessionPhase::Responding => Err(AppError::SessionNotReady(
                format!("cannot accept audio while {}", self.phase.as_str()),
            )),
            SessionPhase::Closed => Err(AppError::TransportClosed),
        }
    }

    /// Seal the current utterance and hand back the assembled clip.
    ///
    /// ## State Transition:
    /// `Recording -> Committed` on success. A commit in `Idle` is the
    /// empty-commit protocol violation: it fails with `EmptyBuffer` and the
    /// session stays in `Idle`. A second commit while `Committed`/
    /// `Responding` is rejected as not-ready.
    pub fn commit_utterance(&mut self) -> AppResult<AudioClip> {
        match self.phase {
            SessionPhase::Recording => match self.assembler.commit() {
                Ok(clip) => {
                    self.phase = SessionPhase::Committed;
                    Ok(clip)
                }
                Err(err) => {
                    // Unreachable in practice (Recording implies fragments),
                    // but an empty commit must still land back in Idle.
                    self.phase = SessionPhase::Idle;
                    Err(err)
                }
            },
            SessionPhase::Idle => Err(AppError::EmptyBuffer),
            SessionPhase::Committed | SessionPhase::Responding => Err(AppError::SessionNotReady(
                format!("cannot commit while {}", self.phase.as_str()),
            )),
            SessionPhase::Closed => Err(AppError::TransportClosed),
        }
    }

    /// A typed user message is about to start a turn. Takes the session out
    /// of `Idle` exactly as a committed utterance would, so audio frames and
    /// further inputs are rejected until the turn completes.
    pub fn begin_text_turn(&mut self) -> AppResult<()> {
        match self.phase {
            SessionPhase::Idle => {
                self.phase = SessionPhase::Committed;
                Ok(())
            }
            SessionPhase::Closed => Err(AppError::TransportClosed),
            _ => Err(AppError::SessionNotReady(format!(
                "cannot start a turn while {}",
                self.phase.as_str()
            ))),
        }
    }

    /// The pipeline has started emitting: `Committed -> Responding`.
    pub fn begin_responding(&mut self) {
        if self.phase == SessionPhase::Committed {
            self.phase = SessionPhase::Responding;
        }
    }

    /// A turn finished (successfully or not): adopt its final history and
    /// agent, and return to `Idle` for the next utterance.
    pub fn finish_turn(&mut self, history: Vec<Turn>, agent: AgentProfile) {
        if self.phase == SessionPhase::Closed {
            return;
        }
        self.history = history;
        self.agent = agent;
        self.phase = SessionPhase::Idle;
    }

    /// Abort an in-progress recording after a bad fragment and return to
    /// `Idle` with an empty accumulator. A no-op outside `Recording` — a
    /// response in flight must not be disturbed by a stray frame.
    pub fn reset_to_idle(&mut self) {
        if self.phase == SessionPhase::Recording {
            self.assembler.clear();
            self.phase = SessionPhase::Idle;
        }
    }

    /// Replace the conversation history wholesale. Orthogonal to the audio
    /// state machine — legal in any phase.
    pub fn replace_history(&mut self, inputs: Vec<Turn>) {
        self.history = inputs;
    }

    /// Transport loss: terminal. Buffered audio is dropped.
    pub fn close(&mut self) {
        self.assembler.clear();
        self.phase = SessionPhase::Closed;
    }
}

/// Summary row the registry keeps per live session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
}

/// Process-wide map of live sessions.
///
/// ## Thread Safety:
/// Registered from each connection's actor and read by the health
/// endpoints, so entries live behind an `RwLock`. The registry never owns
/// session state — just enough metadata to enforce the concurrency limit
/// and report activity.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    max_concurrent_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
        }
    }

    /// Register a new session, enforcing the concurrent-session limit.
    pub fn register(&self, session_id: &str, user_id: &str) -> AppResult<()> {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.len() >= self.max_concurrent_sessions {
            return Err(AppError::SessionNotReady(format!(
                "maximum concurrent sessions ({}) reached",
                self.max_concurrent_sessions
            )));
        }
        if sessions.contains_key(session_id) {
            return Err(AppError::SessionNotReady(format!(
                "session id '{}' already exists",
                session_id
            )));
        }
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                user_id: user_id.to_string(),
                connected_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Remove a session on connection close.
    pub fn deregister(&self, session_id: &str) -> bool {
        self.sessions.write().unwrap().remove(session_id).is_some()
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn active_session_ids(&self) -> Vec<String> {
        self.sessions.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_config() -> AudioConfig {
        AudioConfig {
            sample_rate: 24_000,
            channels: 1,
            bit_depth: 16,
            max_utterance_bytes: 1024,
        }
    }

    fn session() -> VoiceSession {
        VoiceSession::new("s-1".to_string(), "user-a".to_string(), &audio_config())
    }

    #[test]
    fn test_commit_in_idle_is_rejected_and_stays_idle() {
        let mut session = session();
        assert!(matches!(session.commit_utterance(), Err(AppError::EmptyBuffer)));
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_append_then_commit_walks_the_state_machine() {
        let mut session = session();
        session.append_audio(&[0, 0, 1, 0]).unwrap();
        assert_eq!(session.phase(), SessionPhase::Recording);

        let clip = session.commit_utterance().unwrap();
        assert_eq!(clip.samples, vec![0, 1]);
        assert_eq!(session.phase(), SessionPhase::Committed);

        session.begin_responding();
        assert_eq!(session.phase(), SessionPhase::Responding);

        session.finish_turn(vec![Turn::user("hi")], AgentProfile::JobTracker);
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(session.history.len(), 1);
    }

    #[test]
    fn test_audio_rejected_while_response_in_flight() {
        let mut session = session();
        session.append_audio(&[0, 0]).unwrap();
        session.commit_utterance().unwrap();

        // Committed: no audio, no second commit.
        assert!(matches!(
            session.append_audio(&[0, 0]),
            Err(AppError::SessionNotReady(_))
        ));
        assert!(matches!(
            session.commit_utterance(),
            Err(AppError::SessionNotReady(_))
        ));

        session.begin_responding();
        assert!(matches!(
            session.append_audio(&[0, 0]),
            Err(AppError::SessionNotReady(_))
        ));
    }

    #[test]
    fn test_history_replacement_is_orthogonal_to_audio_state() {
        let mut session = session();
        session.append_audio(&[0, 0]).unwrap();
        session.replace_history(vec![Turn::user("earlier"), Turn::assistant("noted")]);

        // Still recording; the buffered audio survived the history swap.
        assert_eq!(session.phase(), SessionPhase::Recording);
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.commit_utterance().unwrap().samples, vec![0]);
    }

    #[test]
    fn test_reset_to_idle_only_applies_while_recording() {
        let mut session = session();
        session.append_audio(&[0, 0]).unwrap();
        session.reset_to_idle();
        assert_eq!(session.phase(), SessionPhase::Idle);
        // The dropped fragment is gone: a commit now is an empty commit.
        assert!(matches!(session.commit_utterance(), Err(AppError::EmptyBuffer)));

        // Mid-response a reset is a no-op.
        session.append_audio(&[0, 0]).unwrap();
        session.commit_utterance().unwrap();
        session.begin_responding();
        session.reset_to_idle();
        assert_eq!(session.phase(), SessionPhase::Responding);
    }

    #[test]
    fn test_text_turn_occupies_the_session() {
        let mut session = session();
        session.begin_text_turn().unwrap();
        assert_eq!(session.phase(), SessionPhase::Committed);

        assert!(matches!(
            session.append_audio(&[0, 0]),
            Err(AppError::SessionNotReady(_))
        ));
        assert!(session.begin_text_turn().is_err());

        session.finish_turn(vec![], AgentProfile::JobTracker);
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut session = session();
        session.append_audio(&[0, 0]).unwrap();
        session.close();

        assert!(session.is_closed());
        assert!(matches!(session.append_audio(&[0, 0]), Err(AppError::TransportClosed)));
        assert!(matches!(session.commit_utterance(), Err(AppError::TransportClosed)));

        // A late turn completion must not resurrect the session.
        session.finish_turn(vec![], AgentProfile::JobTracker);
        assert!(session.is_closed());
    }

    #[test]
    fn test_registry_enforces_session_limit() {
        let registry = SessionRegistry::new(2);
        registry.register("s-1", "user-a").unwrap();
        registry.register("s-2", "user-b").unwrap();
        assert!(registry.register("s-3", "user-c").is_err());

        registry.deregister("s-1");
        assert!(registry.register("s-3", "user-c").is_ok());
        assert_eq!(registry.active_session_count(), 2);
    }

    #[test]
    fn test_registry_rejects_duplicate_ids() {
        let registry = SessionRegistry::new(8);
        registry.register("s-1", "user-a").unwrap();
        assert!(registry.register("s-1", "user-a").is_err());
    }

    #[test]
    fn test_turn_serialization_shapes() {
        let turn = Turn::user("add Google software engineer");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["role"], "user");

        let call = Turn::FunctionCall {
            name: "add_job_application".to_string(),
            arguments: serde_json::json!({"company": "Google"}),
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["type"], "function_call");

        let round_trip: Turn = serde_json::from_value(json).unwrap();
        assert_eq!(round_trip, call);
    }
}
