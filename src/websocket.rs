//! # WebSocket Voice Session Handler
//!
//! Terminates one voice session per WebSocket connection: demultiplexes the
//! client's control and audio frames, walks the per-utterance state machine,
//! and re-multiplexes the response events the pipeline produces.
//!
//! ## WebSocket Protocol (JSON text frames):
//! - **Client → Server**: `history.update` (replace conversation history,
//!   optionally carrying a new typed user message), `input_audio_buffer.append`
//!   (one base64 PCM fragment), `input_audio_buffer.commit` (end of utterance)
//! - **Server → Client**: `history.updated` (full history + active agent
//!   name), `response.audio.delta` (one base64 PCM fragment), `audio.done`
//!   (terminal marker), `error` (explicit rejection, never a dropped frame)
//!
//! ## Ordering Model:
//! The actor mailbox is the session's single logical task: client frames and
//! turn outputs are processed strictly in arrival order, so no two state
//! transitions for one session ever run concurrently. Distinct connections
//! are independent actors and run in parallel.
//!
//! ## Teardown:
//! Transport loss stops the actor. A turn already in flight keeps running on
//! its own task so store mutations complete, but its outputs land in a dead
//! mailbox and are discarded.

use crate::agent::profile::AgentProfile;
use crate::agent::tools::ToolDispatcher;
use crate::agent::turn::{TurnCompletion, TurnOutput, TurnRunner};
use crate::audio::buffer::AudioClip;
use crate::error::AppError;
use crate::session::{SessionPhase, Turn, VoiceSession};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Frames the client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Replace/sync the conversation history. If the last input is a user
    /// message, it is treated as new typed input and starts a turn.
    #[serde(rename = "history.update")]
    HistoryUpdate {
        #[serde(default)]
        inputs: Vec<Turn>,
        #[serde(default)]
        reset_agent: bool,
    },

    /// One base64-encoded PCM fragment of the in-progress utterance.
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend { delta: String },

    /// End of utterance; triggers transcription and the agent turn.
    #[serde(rename = "input_audio_buffer.commit")]
    AudioCommit,
}

/// Frames the server sends.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "history.updated")]
    HistoryUpdated {
        reason: String,
        inputs: Vec<Turn>,
        agent_name: String,
    },

    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        delta: String,
        output_index: u32,
        content_index: u32,
        item_id: String,
        response_id: String,
        event_id: String,
    },

    #[serde(rename = "audio.done")]
    AudioDone,

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

/// WebSocket actor for one voice session.
pub struct VoiceWebSocket {
    /// Session state, owned exclusively by this actor
    session: VoiceSession,

    /// Shared server state (store, registry, pipeline, metrics)
    app_state: web::Data<AppState>,

    /// Turn executor shared with the spawned per-utterance tasks
    runner: TurnRunner,

    heartbeat_interval: Duration,
    client_timeout: Duration,
    last_heartbeat: Instant,
}

impl VoiceWebSocket {
    pub fn new(session: VoiceSession, app_state: web::Data<AppState>) -> Self {
        let config = app_state.get_config();
        let runner = TurnRunner::new(
            app_state.pipeline(),
            ToolDispatcher::new(app_state.store()),
        );
        Self {
            session,
            app_state,
            runner,
            heartbeat_interval: Duration::from_secs(config.session.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(config.session.client_timeout_secs),
            last_heartbeat: Instant::now(),
        }
    }

    fn send_frame(&self, ctx: &mut ws::WebsocketContext<Self>, frame: &ServerFrame) {
        match serde_json::to_string(frame) {
            Ok(json) => ctx.text(json),
            Err(err) => warn!(error = %err, "failed to serialize server frame"),
        }
    }

    /// Surface an error to the client as an explicit frame. Frames are
    /// rejected loudly, never silently dropped.
    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, error: &AppError) {
        warn!(
            session_id = %self.session.session_id,
            code = error.code(),
            error = %error,
            "session error frame"
        );
        self.send_frame(
            ctx,
            &ServerFrame::Error {
                code: error.code().to_string(),
                message: error.to_string(),
            },
        );
    }

    fn send_history(&self, ctx: &mut ws::WebsocketContext<Self>, reason: &str) {
        self.send_frame(
            ctx,
            &ServerFrame::HistoryUpdated {
                reason: reason.to_string(),
                inputs: self.session.history.clone(),
                agent_name: self.session.agent.name().to_string(),
            },
        );
    }

    fn handle_client_frame(&mut self, frame: ClientFrame, ctx: &mut ws::WebsocketContext<Self>) {
        match frame {
            ClientFrame::HistoryUpdate { inputs, reset_agent } => {
                self.handle_history_update(inputs, reset_agent, ctx)
            }
            ClientFrame::AudioAppend { delta } => self.handle_audio_append(&delta, ctx),
            ClientFrame::AudioCommit => self.handle_audio_commit(ctx),
        }
    }

    /// History updates apply in any phase without touching the audio state
    /// machine. A trailing user message is new typed input and starts a
    /// turn — but only from `Idle`; mid-response it is rejected (the sync
    /// part still applies).
    fn handle_history_update(
        &mut self,
        mut inputs: Vec<Turn>,
        reset_agent: bool,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        if reset_agent {
            self.session.agent = AgentProfile::default();
        }

        let is_text_input = inputs.last().map(Turn::is_user_message).unwrap_or(false);
        if !is_text_input {
            self.session.replace_history(inputs);
            self.send_history(ctx, "history.update");
            return;
        }

        if self.session.phase() != SessionPhase::Idle {
            self.session.replace_history(inputs);
            self.send_error(
                ctx,
                &AppError::SessionNotReady(
                    "a response is already in progress; send new input after audio.done"
                        .to_string(),
                ),
            );
            return;
        }

        let input = match inputs.pop() {
            Some(Turn::Message { content, .. }) => content,
            _ => return, // unreachable: guarded by is_text_input
        };
        self.session.replace_history(inputs);
        if let Err(error) = self.session.begin_text_turn() {
            self.send_error(ctx, &error);
            return;
        }
        self.spawn_turn(ctx, TurnInput::Text(input));
    }

    fn handle_audio_append(&mut self, delta: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let bytes = match BASE64.decode(delta) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.session.reset_to_idle();
                self.send_error(
                    ctx,
                    &AppError::ValidationError(format!("audio fragment is not valid base64: {}", err)),
                );
                return;
            }
        };
        if let Err(error) = self.session.append_audio(&bytes) {
            // A malformed or oversized fragment invalidates the whole
            // utterance: drop it and go back to Idle. A wrong-phase append
            // must NOT reset — a response is in flight.
            if matches!(error, AppError::ValidationError(_)) {
                self.session.reset_to_idle();
            }
            self.send_error(ctx, &error);
        }
    }

    fn handle_audio_commit(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        match self.session.commit_utterance() {
            Ok(clip) => {
                debug!(
                    session_id = %self.session.session_id,
                    duration_secs = clip.duration_seconds(),
                    "utterance committed"
                );
                self.app_state.record_utterance();
                self.spawn_turn(ctx, TurnInput::Audio(clip));
            }
            Err(error) => {
                // Empty commit or commit mid-response: reject with a frame.
                // The state machine was left where it belongs (Idle for the
                // former, unchanged for the latter).
                self.send_error(ctx, &error);
            }
        }
    }

    /// Run one agent turn on its own task. Outputs flow back through the
    /// mailbox, so their handling is serialized with client frames; the
    /// completion arrives last, after every output has been forwarded.
    fn spawn_turn(&mut self, ctx: &mut ws::WebsocketContext<Self>, input: TurnInput) {
        let runner = self.runner.clone();
        let user_id = self.session.user_id.clone();
        let agent = self.session.agent;
        let history = self.session.history.clone();
        let addr = ctx.address();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = oneshot::channel();

        tokio::spawn(async move {
            let completion = match input {
                TurnInput::Audio(clip) => {
                    runner.run_utterance(&user_id, agent, history, clip, &tx).await
                }
                TurnInput::Text(text) => {
                    runner.run_text_input(&user_id, agent, history, text, &tx).await
                }
            };
            let _ = completion_tx.send(completion);
            // tx drops here, closing the output channel below.
        });

        tokio::spawn(async move {
            while let Some(output) = rx.recv().await {
                addr.do_send(ForwardOutput(output));
            }
            if let Ok(completion) = completion_rx.await {
                addr.do_send(TurnFinished(completion));
            }
        });
    }
}

/// What kind of input starts a turn.
enum TurnInput {
    Audio(AudioClip),
    Text(String),
}

/// Internal message: one turn output to relay to the client.
#[derive(Message)]
#[rtype(result = "()")]
struct ForwardOutput(TurnOutput);

/// Internal message: the turn ended; adopt its history and agent.
#[derive(Message)]
#[rtype(result = "()")]
struct TurnFinished(TurnCompletion);

impl Actor for VoiceWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            session_id = %self.session.session_id,
            user_id = %self.session.user_id,
            "voice session started"
        );

        // Heartbeat: ping on an interval, drop the connection when the
        // client goes quiet past the timeout.
        let interval = self.heartbeat_interval;
        ctx.run_interval(interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(
                    session_id = %act.session.session_id,
                    "heartbeat timeout, closing connection"
                );
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.session.close();
        self.app_state.registry().deregister(&self.session.session_id);
        info!(
            session_id = %self.session.session_id,
            "voice session closed"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for VoiceWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => self.handle_client_frame(frame, ctx),
                Err(err) => {
                    self.send_error(
                        ctx,
                        &AppError::ValidationError(format!("unrecognized frame: {}", err)),
                    );
                }
            },
            Ok(ws::Message::Binary(_)) => {
                // Audio travels base64-encoded inside JSON frames on this
                // protocol; raw binary has no meaning here.
                self.send_error(
                    ctx,
                    &AppError::ValidationError(
                        "binary frames are not part of this protocol".to_string(),
                    ),
                );
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(
                    session_id = %self.session.session_id,
                    reason = ?reason,
                    "client closed connection"
                );
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(
                    session_id = %self.session.session_id,
                    error = %err,
                    "websocket protocol error"
                );
                ctx.stop();
            }
        }
    }
}

impl Handler<ForwardOutput> for VoiceWebSocket {
    type Result = ();

    fn handle(&mut self, msg: ForwardOutput, ctx: &mut Self::Context) {
        // The first output of a committed utterance marks the transition to
        // streaming; a no-op in every other phase.
        self.session.begin_responding();

        match msg.0 {
            TurnOutput::HistoryChanged {
                reason,
                history,
                agent_name,
            } => {
                self.send_frame(
                    ctx,
                    &ServerFrame::HistoryUpdated {
                        reason: reason.to_string(),
                        inputs: history,
                        agent_name: agent_name.to_string(),
                    },
                );
            }
            TurnOutput::AudioFragment(bytes) => {
                self.send_frame(
                    ctx,
                    &ServerFrame::AudioDelta {
                        delta: BASE64.encode(&bytes),
                        output_index: 0,
                        content_index: 0,
                        item_id: String::new(),
                        response_id: String::new(),
                        event_id: String::new(),
                    },
                );
            }
            TurnOutput::AudioDone => {
                self.send_frame(ctx, &ServerFrame::AudioDone);
            }
            TurnOutput::Failed { error } => {
                self.app_state.record_turn_failure();
                self.send_error(ctx, &error);
            }
        }
    }
}

impl Handler<TurnFinished> for VoiceWebSocket {
    type Result = ();

    fn handle(&mut self, msg: TurnFinished, _ctx: &mut Self::Context) {
        let TurnFinished(completion) = msg;
        self.session.finish_turn(completion.history, completion.agent);
        debug!(
            session_id = %self.session.session_id,
            history_len = self.session.history.len(),
            agent = self.session.agent.name(),
            "turn finished, session idle"
        );
    }
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection to a fresh [`VoiceWebSocket`] actor.
///
/// The session registers before the upgrade so a server at its session
/// limit refuses with an HTTP error instead of accepting and dropping.
pub async fn voice_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let config = app_state.get_config();

    let query = web::Query::<std::collections::HashMap<String, String>>::from_query(
        req.query_string(),
    )
    .unwrap_or_else(|_| web::Query(std::collections::HashMap::new()));
    let user_id = query
        .get("user")
        .cloned()
        .unwrap_or_else(|| config.session.default_user_id.clone());

    let session_id = Uuid::new_v4().to_string();
    if let Err(error) = app_state.registry().register(&session_id, &user_id) {
        warn!(error = %error, "refusing websocket connection");
        return Ok(actix_web::ResponseError::error_response(&error));
    }

    info!(
        session_id = %session_id,
        user_id = %user_id,
        peer = ?req.connection_info().peer_addr(),
        "new voice session connection"
    );

    let session = VoiceSession::new(session_id, user_id, &config.audio);
    let websocket = VoiceWebSocket::new(session, app_state);
    ws::start(websocket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use serde_json::json;

    #[test]
    fn test_client_frame_parsing() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type": "input_audio_buffer.commit"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::AudioCommit));

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type": "input_audio_buffer.append", "delta": "AAA="}"#)
                .unwrap();
        match frame {
            ClientFrame::AudioAppend { delta } => assert_eq!(delta, "AAA="),
            _ => panic!("wrong frame type"),
        }

        let frame: ClientFrame = serde_json::from_str(
            r#"{"type": "history.update", "inputs": [{"type": "message", "role": "user", "content": "hi"}]}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::HistoryUpdate { inputs, reset_agent } => {
                assert_eq!(inputs.len(), 1);
                assert!(!reset_agent);
                assert!(inputs[0].is_user_message());
            }
            _ => panic!("wrong frame type"),
        }
    }

    #[test]
    fn test_unknown_frame_type_is_a_parse_error() {
        let result = serde_json::from_str::<ClientFrame>(r#"{"type": "session.destroy"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_server_frame_wire_shapes() {
        let frame = ServerFrame::HistoryUpdated {
            reason: "response.done".to_string(),
            inputs: vec![Turn::Message {
                role: Role::Assistant,
                content: "done".to_string(),
            }],
            agent_name: "Job Application Tracker".to_string(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], json!("history.updated"));
        assert_eq!(value["agent_name"], json!("Job Application Tracker"));
        assert_eq!(value["inputs"][0]["role"], json!("assistant"));

        let frame = ServerFrame::AudioDelta {
            delta: BASE64.encode([1u8, 2, 3]),
            output_index: 0,
            content_index: 0,
            item_id: String::new(),
            response_id: String::new(),
            event_id: String::new(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], json!("response.audio.delta"));
        assert_eq!(value["delta"], json!("AQID"));
        assert_eq!(value["output_index"], json!(0));

        let value = serde_json::to_value(&ServerFrame::AudioDone).unwrap();
        assert_eq!(value, json!({"type": "audio.done"}));

        let value = serde_json::to_value(&ServerFrame::Error {
            code: "empty_buffer".to_string(),
            message: "nothing to commit".to_string(),
        })
        .unwrap();
        assert_eq!(value["type"], json!("error"));
        assert_eq!(value["code"], json!("empty_buffer"));
    }
}
