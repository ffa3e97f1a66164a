//! Scripted pipeline for turn-driving tests. Plays back a fixed transcript
//! and event sequence, records every dispatcher result it is handed, and can
//! be told to fail at each stage.

use crate::agent::profile::AgentProfile;
use crate::audio::buffer::AudioClip;
use crate::error::{AppError, AppResult};
use crate::pipeline::{AgentPipeline, TurnEvent};
use crate::session::Turn;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Script entry; mirrors [`TurnEvent`] without the responder plumbing.
#[derive(Debug, Clone)]
pub enum ScriptedEvent {
    Text(String),
    Call { name: String, arguments: Value },
    Handoff(String),
    Done(String),
}

#[derive(Default)]
pub struct MockPipeline {
    pub transcript: String,
    pub events: Vec<ScriptedEvent>,
    pub speech_fragments: Vec<Vec<u8>>,
    pub fail_transcription: bool,
    pub fail_turn: bool,
    pub fail_synthesis: bool,
    /// Dispatcher results observed for each scripted `Call`, in order.
    pub tool_results: Arc<Mutex<Vec<Value>>>,
}

impl MockPipeline {
    pub fn scripted(transcript: &str, events: Vec<ScriptedEvent>) -> Self {
        Self {
            transcript: transcript.to_string(),
            events,
            speech_fragments: vec![vec![1, 2], vec![3, 4]],
            ..Self::default()
        }
    }
}

#[async_trait]
impl AgentPipeline for MockPipeline {
    async fn transcribe(&self, _clip: &AudioClip) -> AppResult<String> {
        if self.fail_transcription {
            return Err(AppError::UpstreamUnavailable("transcription offline".to_string()));
        }
        Ok(self.transcript.clone())
    }

    async fn run_turn(
        &self,
        _agent: AgentProfile,
        _history: &[Turn],
        _user_input: &str,
    ) -> AppResult<mpsc::Receiver<TurnEvent>> {
        if self.fail_turn {
            return Err(AppError::UpstreamUnavailable("agent offline".to_string()));
        }
        let (tx, rx) = mpsc::channel(8);
        let events = self.events.clone();
        let tool_results = self.tool_results.clone();

        tokio::spawn(async move {
            for event in events {
                match event {
                    ScriptedEvent::Text(delta) => {
                        if tx.send(TurnEvent::TextDelta(delta)).await.is_err() {
                            return;
                        }
                    }
                    ScriptedEvent::Handoff(agent_name) => {
                        if tx.send(TurnEvent::Handoff { agent_name }).await.is_err() {
                            return;
                        }
                    }
                    ScriptedEvent::Done(final_text) => {
                        let _ = tx.send(TurnEvent::Done { final_text }).await;
                        return;
                    }
                    ScriptedEvent::Call { name, arguments } => {
                        let (respond_to, result) = oneshot::channel();
                        if tx
                            .send(TurnEvent::FunctionCall {
                                name,
                                arguments,
                                respond_to,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                        match result.await {
                            Ok(output) => tool_results.lock().unwrap().push(output),
                            Err(_) => return,
                        }
                    }
                }
            }
            // Script exhausted without Done: channel closes, which the turn
            // runner reads as an upstream failure.
        });

        Ok(rx)
    }

    async fn synthesize(&self, _text: &str) -> AppResult<mpsc::Receiver<Vec<u8>>> {
        if self.fail_synthesis {
            return Err(AppError::UpstreamUnavailable("synthesis offline".to_string()));
        }
        let (tx, rx) = mpsc::channel(8);
        let fragments = self.speech_fragments.clone();
        tokio::spawn(async move {
            for fragment in fragments {
                if tx.send(fragment).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}
