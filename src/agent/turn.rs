//! # Turn Orchestration
//!
//! Drives one user input (spoken or typed) through the pipeline: transcribe,
//! run the agent turn, dispatch every function call it raises, then stream
//! the synthesized reply. The protocol handler spawns [`TurnRunner::run`]
//! per committed utterance and forwards its [`TurnOutput`] events to the
//! client as wire frames.
//!
//! ## History Side Effect:
//! Every step that completes part of the turn appends its structured
//! message to the conversation history and emits a history-changed output,
//! tagged with the reason and the active agent's display name — the client
//! renders the conversation purely from these events.
//!
//! ## Cancellation:
//! If the transport closes mid-turn the output channel's receiver is
//! dropped. Sends start failing, but the loop keeps consuming events so any
//! in-flight store mutation still completes — its result is simply
//! discarded, never lost half-applied.

use crate::agent::profile::AgentProfile;
use crate::agent::tools::{ToolCall, ToolDispatcher};
use crate::audio::buffer::AudioClip;
use crate::error::AppError;
use crate::pipeline::{AgentPipeline, TurnEvent};
use crate::session::Turn;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Output of a running turn, converted to wire frames by the protocol
/// handler.
#[derive(Debug)]
pub enum TurnOutput {
    /// The conversation history changed; carries the full replacement list
    HistoryChanged {
        reason: &'static str,
        history: Vec<Turn>,
        agent_name: &'static str,
    },

    /// One synthesized PCM fragment
    AudioFragment(Vec<u8>),

    /// Terminal marker for the audio of this response
    AudioDone,

    /// The turn hit a non-recoverable failure; becomes an error frame
    Failed { error: AppError },
}

/// What the session adopts once the turn ends.
#[derive(Debug)]
pub struct TurnCompletion {
    pub history: Vec<Turn>,
    pub agent: AgentProfile,
}

/// Executes agent turns against the pipeline and the tool dispatcher.
#[derive(Clone)]
pub struct TurnRunner {
    pipeline: Arc<dyn AgentPipeline>,
    dispatcher: ToolDispatcher,
}

impl TurnRunner {
    pub fn new(pipeline: Arc<dyn AgentPipeline>, dispatcher: ToolDispatcher) -> Self {
        Self {
            pipeline,
            dispatcher,
        }
    }

    /// Run a turn for one committed utterance.
    pub async fn run_utterance(
        &self,
        user_id: &str,
        agent: AgentProfile,
        history: Vec<Turn>,
        clip: AudioClip,
        out: &UnboundedSender<TurnOutput>,
    ) -> TurnCompletion {
        debug!(
            user_id = %user_id,
            duration_secs = clip.duration_seconds(),
            "transcribing utterance"
        );
        let text = match self.pipeline.transcribe(&clip).await {
            Ok(text) => text,
            Err(error) => {
                // The utterance is not silently dropped: the client gets an
                // explicit upstream error frame and can retry.
                let _ = out.send(TurnOutput::Failed { error });
                return TurnCompletion { history, agent };
            }
        };
        self.run_input(user_id, agent, history, text, out).await
    }

    /// Run a turn for a typed user message (the text path of
    /// `history.update`).
    pub async fn run_text_input(
        &self,
        user_id: &str,
        agent: AgentProfile,
        history: Vec<Turn>,
        input: String,
        out: &UnboundedSender<TurnOutput>,
    ) -> TurnCompletion {
        self.run_input(user_id, agent, history, input, out).await
    }

    async fn run_input(
        &self,
        user_id: &str,
        mut agent: AgentProfile,
        mut history: Vec<Turn>,
        input: String,
        out: &UnboundedSender<TurnOutput>,
    ) -> TurnCompletion {
        history.push(Turn::user(input.clone()));
        emit(out, "user.input", &history, agent);

        let mut events = match self.pipeline.run_turn(agent, &history, &input).await {
            Ok(events) => events,
            Err(error) => {
                let _ = out.send(TurnOutput::Failed { error });
                return TurnCompletion { history, agent };
            }
        };

        let mut partial = String::new();
        let mut final_text: Option<String> = None;

        while let Some(event) = events.recv().await {
            match event {
                TurnEvent::TextDelta(delta) => {
                    partial.push_str(&delta);
                    // The partial reply rides along as a provisional
                    // assistant message; it is not part of history until the
                    // turn completes.
                    let mut preview = history.clone();
                    preview.push(Turn::assistant(partial.clone()));
                    let _ = out.send(TurnOutput::HistoryChanged {
                        reason: "response.text.delta",
                        history: preview,
                        agent_name: agent.name(),
                    });
                }
                TurnEvent::FunctionCall {
                    name,
                    arguments,
                    respond_to,
                } => {
                    history.push(Turn::FunctionCall {
                        name: name.clone(),
                        arguments: arguments.clone(),
                    });
                    emit(out, "response.function_call", &history, agent);

                    // The turn is suspended until this returns.
                    let result = self
                        .dispatcher
                        .dispatch(user_id, &ToolCall { name: name.clone(), arguments });

                    history.push(Turn::FunctionResult {
                        name,
                        output: result.clone(),
                    });
                    emit(out, "response.function_result", &history, agent);
                    let _ = respond_to.send(result);
                }
                TurnEvent::Handoff { agent_name } => match AgentProfile::by_name(&agent_name) {
                    Some(target) => {
                        debug!(from = agent.name(), to = target.name(), "agent handoff");
                        agent = target;
                        emit(out, "agent.handoff", &history, agent);
                    }
                    None => {
                        warn!(agent_name = %agent_name, "handoff to unknown agent ignored");
                    }
                },
                TurnEvent::Done { final_text: text } => {
                    final_text = Some(text);
                }
            }
        }

        match final_text {
            Some(text) => {
                history.push(Turn::assistant(text.clone()));
                emit(out, "response.done", &history, agent);
                self.stream_speech(&text, out).await;
            }
            None => {
                // Stream ended without a terminal event: the upstream turn
                // died. Work already dispatched stays applied.
                let _ = out.send(TurnOutput::Failed {
                    error: AppError::UpstreamUnavailable(
                        "agent turn ended without completing".to_string(),
                    ),
                });
            }
        }

        TurnCompletion { history, agent }
    }

    /// Stream synthesized speech for the final reply. Synthesis failure
    /// degrades to text-only: the reply is already in the history, so the
    /// client gets an upstream error frame plus the terminal audio marker.
    async fn stream_speech(&self, text: &str, out: &UnboundedSender<TurnOutput>) {
        match self.pipeline.synthesize(text).await {
            Ok(mut fragments) => {
                while let Some(fragment) = fragments.recv().await {
                    let _ = out.send(TurnOutput::AudioFragment(fragment));
                }
            }
            Err(error) => {
                warn!(error = %error, "speech synthesis failed, responding text-only");
                let _ = out.send(TurnOutput::Failed { error });
            }
        }
        let _ = out.send(TurnOutput::AudioDone);
    }
}

fn emit(out: &UnboundedSender<TurnOutput>, reason: &'static str, history: &[Turn], agent: AgentProfile) {
    let _ = out.send(TurnOutput::HistoryChanged {
        reason,
        history: history.to_vec(),
        agent_name: agent.name(),
    });
}
