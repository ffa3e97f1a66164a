//! # Pipeline Adapter
//!
//! Boundary to the external speech/agent service. Everything behind the
//! [`AgentPipeline`] trait is opaque to this server: speech recognition,
//! natural-language understanding and speech synthesis all happen upstream.
//! This module only defines the seam and a thin HTTP client for it.
//!
//! ## Turn Suspension:
//! When the upstream agent emits a function call mid-turn, the corresponding
//! [`TurnEvent::FunctionCall`] carries a oneshot responder. The adapter does
//! not produce further events until the dispatcher's result is sent back
//! through it — which is exactly the contract: the turn suspends until the
//! dispatch returns.

pub mod http;

use crate::agent::profile::AgentProfile;
use crate::audio::buffer::AudioClip;
use crate::error::AppResult;
use crate::session::Turn;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// One event in an agent turn's output stream.
#[derive(Debug)]
pub enum TurnEvent {
    /// Incremental assistant text
    TextDelta(String),

    /// Structured function call; the turn is suspended until a result is
    /// sent through `respond_to`
    FunctionCall {
        name: String,
        arguments: Value,
        respond_to: oneshot::Sender<Value>,
    },

    /// The upstream agent handed the conversation to another variant
    Handoff { agent_name: String },

    /// Terminal event carrying the complete assistant reply
    Done { final_text: String },
}

/// The transcription/agent/synthesis service boundary.
///
/// Implementations must be cheap to share (`Arc<dyn AgentPipeline>`) and are
/// expected to enforce their own per-request timeouts, surfacing
/// `UpstreamUnavailable` instead of hanging a session.
#[async_trait]
pub trait AgentPipeline: Send + Sync {
    /// Transcribe one committed utterance to text.
    async fn transcribe(&self, clip: &AudioClip) -> AppResult<String>;

    /// Run one agent turn over the conversation. Events arrive on the
    /// returned channel; the stream is finite and not restartable, ending
    /// after [`TurnEvent::Done`] (or early on upstream failure).
    async fn run_turn(
        &self,
        agent: AgentProfile,
        history: &[Turn],
        user_input: &str,
    ) -> AppResult<mpsc::Receiver<TurnEvent>>;

    /// Synthesize speech for the assistant's reply. Fragments are raw
    /// 16-bit PCM bytes, emitted as produced.
    async fn synthesize(&self, text: &str) -> AppResult<mpsc::Receiver<Vec<u8>>>;
}

#[cfg(test)]
pub mod mock;
