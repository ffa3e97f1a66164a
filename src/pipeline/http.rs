//! # HTTP Pipeline Client
//!
//! Thin reqwest client for the upstream speech/agent service. Three
//! endpoints, all JSON:
//!
//! - `POST /v1/audio/transcriptions` — PCM in (base64), text out
//! - `POST /v1/agent/turn` + `POST /v1/agent/turn/continue` — one agent
//!   turn, chunked; a chunk either ends the turn (`done`) or parks it on a
//!   pending function call that `continue` resolves
//! - `POST /v1/audio/speech` — text in, raw PCM body out, streamed
//!
//! Every request runs under the configured timeout; expiry and transport
//! failures surface as `UpstreamUnavailable` so the session can emit an
//! error frame instead of hanging.

use crate::agent::profile::AgentProfile;
use crate::audio::buffer::AudioClip;
use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::pipeline::{AgentPipeline, TurnEvent};
use crate::session::Turn;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// How many turn events may queue between the upstream reader and the
/// session before backpressure kicks in.
const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Serialize)]
struct TranscriptionRequest<'a> {
    audio: &'a str,
    sample_rate: u32,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Serialize)]
struct StartTurnRequest<'a> {
    agent: &'a str,
    instructions: &'a str,
    tools: &'a [&'a str],
    history: &'a [Turn],
    input: &'a str,
}

#[derive(Serialize)]
struct ContinueTurnRequest<'a> {
    turn_id: &'a str,
    call_id: &'a str,
    output: &'a Value,
}

/// One chunk of an agent turn. The event list either finishes the turn or
/// stops at a `function_call`, which `continue` resumes.
#[derive(Deserialize)]
struct TurnChunk {
    turn_id: String,
    events: Vec<WireTurnEvent>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireTurnEvent {
    TextDelta {
        delta: String,
    },
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    Handoff {
        agent_name: String,
    },
    Done {
        text: String,
    },
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    input: &'a str,
    sample_rate: u32,
    format: &'a str,
}

/// HTTP implementation of the pipeline boundary.
pub struct HttpPipeline {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpPipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Run a pipeline request under the configured timeout.
    async fn bounded<T, F>(&self, what: &str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::UpstreamUnavailable(format!(
                "{} timed out after {}s",
                what,
                self.timeout.as_secs()
            ))),
        }
    }

    async fn post_turn_chunk<B: Serialize>(
        client: &reqwest::Client,
        url: &str,
        body: &B,
        timeout: Duration,
    ) -> AppResult<TurnChunk> {
        let request = client.post(url).json(body).send();
        let response = match tokio::time::timeout(timeout, request).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AppError::UpstreamUnavailable(format!(
                    "agent turn timed out after {}s",
                    timeout.as_secs()
                )))
            }
        };
        let response = response.error_for_status()?;
        Ok(response.json::<TurnChunk>().await?)
    }
}

#[async_trait]
impl AgentPipeline for HttpPipeline {
    async fn transcribe(&self, clip: &AudioClip) -> AppResult<String> {
        let audio = BASE64.encode(clip.to_le_bytes());
        let url = self.url("/v1/audio/transcriptions");
        let response: TranscriptionResponse = self
            .bounded("transcription", async {
                let response = self
                    .client
                    .post(&url)
                    .json(&TranscriptionRequest {
                        audio: &audio,
                        sample_rate: clip.sample_rate,
                    })
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(response.json().await?)
            })
            .await?;
        debug!(chars = response.text.len(), "utterance transcribed");
        Ok(response.text)
    }

    async fn run_turn(
        &self,
        agent: AgentProfile,
        history: &[Turn],
        user_input: &str,
    ) -> AppResult<mpsc::Receiver<TurnEvent>> {
        let url = self.url("/v1/agent/turn");
        let continue_url = self.url("/v1/agent/turn/continue");

        // The first chunk is fetched before returning so an unreachable
        // upstream fails the commit immediately rather than mid-stream.
        let first = Self::post_turn_chunk(
            &self.client,
            &url,
            &StartTurnRequest {
                agent: agent.name(),
                instructions: agent.instructions(),
                tools: agent.tool_names(),
                history,
                input: user_input,
            },
            self.timeout,
        )
        .await?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let client = self.client.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let mut chunk = first;
            'turn: loop {
                let turn_id = chunk.turn_id.clone();
                let mut pending_call: Option<(String, Value)> = None;

                for event in chunk.events {
                    match event {
                        WireTurnEvent::TextDelta { delta } => {
                            if tx.send(TurnEvent::TextDelta(delta)).await.is_err() {
                                break 'turn; // session gone
                            }
                        }
                        WireTurnEvent::Handoff { agent_name } => {
                            if tx.send(TurnEvent::Handoff { agent_name }).await.is_err() {
                                break 'turn;
                            }
                        }
                        WireTurnEvent::Done { text } => {
                            let _ = tx.send(TurnEvent::Done { final_text: text }).await;
                            break 'turn;
                        }
                        WireTurnEvent::FunctionCall {
                            call_id,
                            name,
                            arguments,
                        } => {
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
                                break 'turn;
                            }
                            // Suspended until the dispatcher's result comes back.
                            match result.await {
                                Ok(output) => pending_call = Some((call_id, output)),
                                Err(_) => break 'turn,
                            }
                        }
                    }
                }

                let Some((call_id, output)) = pending_call else {
                    // Chunk ended without done and without a pending call:
                    // the upstream turn fizzled. Closing the channel lets the
                    // session surface it as an upstream failure.
                    break;
                };

                chunk = match Self::post_turn_chunk(
                    &client,
                    &continue_url,
                    &ContinueTurnRequest {
                        turn_id: &turn_id,
                        call_id: &call_id,
                        output: &output,
                    },
                    timeout,
                )
                .await
                {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        warn!(error = %err, "agent turn continuation failed");
                        break;
                    }
                };
            }
        });

        Ok(rx)
    }

    async fn synthesize(&self, text: &str) -> AppResult<mpsc::Receiver<Vec<u8>>> {
        let url = self.url("/v1/audio/speech");
        let response = self
            .bounded("speech synthesis", async {
                Ok(self
                    .client
                    .post(&url)
                    .json(&SpeechRequest {
                        input: text,
                        sample_rate: 24_000,
                        format: "pcm16",
                    })
                    .send()
                    .await?
                    .error_for_status()?)
            })
            .await?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let timeout = self.timeout;

        tokio::spawn(async move {
            let mut response = response;
            loop {
                let chunk = match tokio::time::timeout(timeout, response.chunk()).await {
                    Ok(Ok(Some(chunk))) => chunk,
                    Ok(Ok(None)) => break, // body exhausted
                    Ok(Err(err)) => {
                        warn!(error = %err, "speech stream aborted");
                        break;
                    }
                    Err(_) => {
                        warn!("speech stream stalled past the request timeout");
                        break;
                    }
                };
                if tx.send(chunk.to_vec()).await.is_err() {
                    break; // session gone, let the body drop
                }
            }
        });

        Ok(rx)
    }
}
