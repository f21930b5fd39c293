//! The relay core (spec.md §4.6): one task per session, owning both
//! sockets and the turn tracker.
//!
//! Grounded in `sa_gateway::nodes::ws::handle_socket`: split sink/stream on
//! both sides, a reader loop built on `tokio::select!`, side effects (here:
//! persistence flushes and assessment calls) spawned off the hot path
//! instead of awaited inline. Unlike `handle_socket`'s single outbound
//! mpsc-fed writer task, this relay has two outbound directions (learner,
//! upstream) and is their only writer, so it writes to both sinks directly
//! rather than routing every frame through a channel.

use std::sync::Arc;

use axum::extract::ws::{Message as LearnerMessage, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as UpstreamMsg;

use vrelay_domain::assessor::PronunciationAssessor;
use vrelay_domain::error::{Error, Recoverable};
use vrelay_domain::events::{publish_best_effort, EventSink};
use vrelay_domain::ids::{SessionId, TurnId};
use vrelay_domain::persistence::PersistenceSink;
use vrelay_protocol::codec::{encode_server_message, parse_client_message, parse_upstream_message};
use vrelay_protocol::{
    AgentState, ClientMessage, EndReason, INTERRUPT_FRAME, ServerMessage, Speaker, UpstreamMessage,
};
use vrelay_sessions::{Session, SessionState, TurnEvent};
use vrelay_upstream::{dial, DialRequest, UpstreamSocket};

use crate::auth::VerifiedToken;
use crate::cancel::CancelToken;
use crate::state::AppState;
use crate::supervisor::SessionCommand;

type LearnerSink = SplitSink<WebSocket, LearnerMessage>;
type LearnerStream = SplitStream<WebSocket>;
type UpstreamSink = SplitSink<UpstreamSocket, UpstreamMsg>;
type UpstreamStream = SplitStream<UpstreamSocket>;

/// Everything the inner dispatch helpers need, grouped so they don't each
/// take half a dozen parameters.
struct Ctx {
    session_id: SessionId,
    session: Arc<Mutex<Session>>,
    persistence: Arc<dyn PersistenceSink>,
    assessor: Arc<dyn PronunciationAssessor>,
    events: Arc<dyn EventSink>,
    threshold: f32,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
}

/// Drive one voice session end to end: dial upstream, register with the
/// supervisor, relay frames in both directions until the session ends, then
/// unwind. The learner's `WebSocket` has already been upgraded by the
/// caller, which has already verified the bearer token and checked the
/// tenant's quota (spec.md §4.7's admission flow happens before this is
/// spawned).
pub async fn run_session(socket: WebSocket, session_id: SessionId, verified: VerifiedToken, state: AppState) {
    let (mut learner_sink, mut learner_stream) = socket.split();

    if state.supervisor.contains(&session_id) {
        send_fatal(
            &mut learner_sink,
            &Error::SessionAlreadyActive {
                session_id: session_id.as_str().to_string(),
            },
            Some(&session_id),
        )
        .await;
        return;
    }

    let seed = match state.persistence.load_session(&session_id).await {
        Ok(Some(seed)) => seed,
        Ok(None) => {
            send_fatal(
                &mut learner_sink,
                &Error::SessionStartFailed(format!("no pre-provisioned session record for {session_id}")),
                Some(&session_id),
            )
            .await;
            return;
        }
        Err(e) => {
            send_fatal(&mut learner_sink, &e, Some(&session_id)).await;
            return;
        }
    };

    let dial_timeout = std::time::Duration::from_millis(state.config.upstream.dial_timeout_ms);
    let upstream = match dial(DialRequest {
        agent_id: &seed.agent_id,
        websocket_url: seed.websocket_url.as_deref(),
        ws_base: state.config.upstream.ws_base.as_deref(),
        api_key: state.config.upstream.api_key.as_deref(),
        dial_timeout,
    })
    .await
    {
        Ok(socket) => socket,
        Err(e) => {
            send_fatal(&mut learner_sink, &e, Some(&session_id)).await;
            return;
        }
    };
    let (mut upstream_sink, mut upstream_stream) = upstream.split();

    let session = Arc::new(Mutex::new(Session::new(
        session_id.clone(),
        verified.tenant_id.clone(),
        seed.learner_id.clone(),
        seed.agent_id.clone(),
        seed.config.clone(),
        state.config.relay.max_audio_buffer_bytes,
    )));

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    let cancel = CancelToken::new();
    if let Err(e) = state.supervisor.register(
        session_id.clone(),
        verified.tenant_id.clone(),
        session.clone(),
        cmd_tx.clone(),
        cancel.clone(),
    ) {
        send_fatal(&mut learner_sink, &e, Some(&session_id)).await;
        return;
    }

    let ctx = Ctx {
        session_id: session_id.clone(),
        session: session.clone(),
        persistence: state.persistence.clone(),
        assessor: state.assessor.clone(),
        events: state.events.clone(),
        threshold: state.config.relay.pronunciation_feedback_threshold,
        cmd_tx: cmd_tx.clone(),
    };

    {
        let mut s = session.lock();
        s.state = SessionState::Ready;
    }
    publish_best_effort(
        ctx.events.as_ref(),
        "voice.session.started",
        json!({ "sessionId": session_id.as_str(), "tenantId": verified.tenant_id.as_str(), "agentId": seed.agent_id.as_str() }),
    )
    .await;
    let _ = learner_sink
        .send(LearnerMessage::Text(encode_server_message(&ServerMessage::SessionReady {
            session_id: session_id.as_str().to_string(),
            agent_id: seed.agent_id.as_str().to_string(),
        })))
        .await;

    let end_reason = loop {
        tokio::select! {
            learner_msg = learner_stream.next() => {
                match learner_msg {
                    Some(Ok(LearnerMessage::Binary(bytes))) => {
                        state.stats.record_audio_bytes_received(bytes.len() as u64);
                        handle_learner_binary(&ctx, bytes, &mut learner_sink, &mut upstream_sink).await;
                    }
                    Some(Ok(LearnerMessage::Text(text))) => {
                        if let Some(reason) = handle_learner_text(&ctx, &text, &mut learner_sink, &mut upstream_sink).await {
                            break reason;
                        }
                    }
                    Some(Ok(LearnerMessage::Close(_))) | None => break EndReason::UserEnded,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(session_id = %session_id, error = %e, "learner socket error");
                        break EndReason::Error;
                    }
                }
            }
            upstream_msg = upstream_stream.next() => {
                match upstream_msg {
                    Some(Ok(UpstreamMsg::Binary(bytes))) => {
                        handle_upstream_binary(&ctx, bytes.into(), &mut learner_sink).await;
                    }
                    Some(Ok(UpstreamMsg::Text(text))) => {
                        if let Some(reason) = handle_upstream_text(&ctx, text.as_ref(), &mut learner_sink).await {
                            break reason;
                        }
                    }
                    Some(Ok(UpstreamMsg::Close(_))) | None => {
                        ctx.session.lock().metrics.record_error("AGENT_DISCONNECTED", "upstream closed the connection");
                        let err = Error::AgentDisconnected("upstream closed the connection".into());
                        send_error(&mut learner_sink, &err, Some(&session_id)).await;
                        break EndReason::Error;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(session_id = %session_id, error = %e, "upstream socket error");
                        ctx.session.lock().metrics.record_error("ELEVENLABS_DISCONNECT", e.to_string());
                        let err = Error::AgentDisconnected(e.to_string());
                        send_error(&mut learner_sink, &err, Some(&session_id)).await;
                        break EndReason::Error;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Heartbeat) => {
                        let ts = Utc::now().timestamp_millis();
                        let _ = learner_sink
                            .send(LearnerMessage::Ping(ts.to_le_bytes().to_vec()))
                            .await;
                    }
                    Some(SessionCommand::End(reason)) => break reason,
                    Some(SessionCommand::AssessmentComplete { turn_id, result }) => {
                        handle_assessment_complete(&ctx, turn_id, result, &mut learner_sink).await;
                    }
                    None => break EndReason::Error,
                }
            }
        }
    };

    cancel.cancel();
    end_session(&ctx, end_reason, &mut learner_sink, &mut upstream_sink).await;
    state.supervisor.remove(&session_id);
}

fn agent_state_for(state: SessionState) -> Option<ServerMessage> {
    match state {
        SessionState::LearnerSpeaking => Some(ServerMessage::AgentStateMsg { state: AgentState::Listening }),
        SessionState::AgentSpeaking => Some(ServerMessage::AgentStateMsg { state: AgentState::Speaking }),
        SessionState::AgentThinking => Some(ServerMessage::AgentStateMsg { state: AgentState::Thinking }),
        _ => None,
    }
}

async fn send_to_learner(sink: &mut LearnerSink, msg: &ServerMessage) {
    let _ = sink.send(LearnerMessage::Text(encode_server_message(msg))).await;
}

async fn send_error(sink: &mut LearnerSink, err: &vrelay_domain::error::Error, session_id: Option<&SessionId>) {
    send_to_learner(
        sink,
        &ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            recoverable: matches!(err.recoverable(), Recoverable::Yes),
            session_id: session_id.map(|s| s.as_str().to_string()),
        },
    )
    .await;
}

/// Send an error and close — used on admission failures, where no `Session`
/// was ever created (spec.md §9 open question: "do not create a session").
async fn send_fatal(sink: &mut LearnerSink, err: &vrelay_domain::error::Error, session_id: Option<&SessionId>) {
    send_error(sink, err, session_id).await;
    let _ = sink.send(LearnerMessage::Close(None)).await;
}

/// Apply the effects of a `Vec<TurnEvent>`: emit control messages to the
/// learner, spawn persistence flushes and assessments off the hot path.
async fn apply_events(ctx: &Ctx, events: Vec<TurnEvent>, learner_sink: &mut LearnerSink) {
    for event in events {
        match event {
            TurnEvent::Emit(msg) => send_to_learner(learner_sink, &msg).await,
            TurnEvent::SchedulePersist(record) => {
                let persistence = ctx.persistence.clone();
                tokio::spawn(async move {
                    if let Err(e) = persistence.flush_turn(&record).await {
                        tracing::warn!(turn_id = %record.turn_id, error = %e, "failed to flush turn");
                    }
                });
            }
            TurnEvent::ScheduleAssessment { turn_id, audio, transcript } => {
                let assessor = ctx.assessor.clone();
                let cmd_tx = ctx.cmd_tx.clone();
                tokio::spawn(async move {
                    let result = assessor
                        .assess(&audio, &transcript)
                        .await
                        .map_err(|e| e.to_string());
                    let _ = cmd_tx.send(SessionCommand::AssessmentComplete { turn_id, result });
                });
            }
        }
    }
}

/// Close (if open) the agent turn and open a learner one — shared by
/// `session.interrupt` from the learner and `interruption` from upstream
/// (spec.md §4.6 state table: `agent_speaking` → learner audio/interrupt →
/// `learner_speaking`).
fn interrupt_to_learner(session: &mut Session) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    let agent_turn_open = matches!(session.current_turn.as_ref().map(|t| t.speaker), Some(Speaker::Agent));
    if agent_turn_open {
        events.extend(session.end_current_turn());
    }
    events.extend(session.start_turn(Speaker::Learner));
    if let Some(msg) = agent_state_for(session.state) {
        events.push(TurnEvent::Emit(msg));
    }
    events
}

async fn handle_learner_binary(
    ctx: &Ctx,
    bytes: Vec<u8>,
    learner_sink: &mut LearnerSink,
    upstream_sink: &mut UpstreamSink,
) {
    let events = {
        let mut s = ctx.session.lock();
        s.touch();
        s.metrics.bytes_received += bytes.len() as u64;
        let events = if s.state != SessionState::LearnerSpeaking {
            let mut ev = s.start_turn(Speaker::Learner);
            if let Some(msg) = agent_state_for(s.state) {
                ev.push(TurnEvent::Emit(msg));
            }
            ev
        } else {
            Vec::new()
        };
        s.ring_buffer.push(&bytes);
        events
    };
    apply_events(ctx, events, learner_sink).await;
    let _ = upstream_sink.send(UpstreamMsg::Binary(bytes.into())).await;
}

async fn handle_upstream_binary(ctx: &Ctx, bytes: Vec<u8>, learner_sink: &mut LearnerSink) {
    let events = {
        let mut s = ctx.session.lock();
        s.touch();
        s.metrics.bytes_sent += bytes.len() as u64;
        if s.state != SessionState::AgentSpeaking {
            let mut ev = s.start_turn(Speaker::Agent);
            if let Some(msg) = agent_state_for(s.state) {
                ev.push(TurnEvent::Emit(msg));
            }
            ev
        } else {
            Vec::new()
        }
    };
    apply_events(ctx, events, learner_sink).await;
    let _ = learner_sink.send(LearnerMessage::Binary(bytes)).await;
}

/// Returns `Some(reason)` when the session should end.
async fn handle_learner_text(
    ctx: &Ctx,
    text: &str,
    learner_sink: &mut LearnerSink,
    upstream_sink: &mut UpstreamSink,
) -> Option<EndReason> {
    let msg = match parse_client_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            send_error(learner_sink, &e, Some(&ctx.session_id)).await;
            return None;
        }
    };

    match msg {
        // The session already started at upgrade time (spec.md §9: the URL
        // is authoritative); a matching id here is a harmless echo.
        ClientMessage::SessionStart { .. } => None,
        ClientMessage::SessionStop { reason, .. } => Some(reason.unwrap_or(EndReason::UserEnded)),
        ClientMessage::SessionConfig { config, .. } => {
            ctx.session.lock().config.apply_patch(&config);
            None
        }
        ClientMessage::SessionInterrupt { .. } => {
            let _ = upstream_sink.send(UpstreamMsg::Text(INTERRUPT_FRAME.to_string().into())).await;
            let events = interrupt_to_learner(&mut ctx.session.lock());
            apply_events(ctx, events, learner_sink).await;
            None
        }
        ClientMessage::SessionTranscript { .. } => {
            let turns: Vec<(Speaker, String, Option<String>, String)> = ctx
                .session
                .lock()
                .turns
                .iter()
                .map(|t| {
                    (
                        t.speaker,
                        t.final_transcript.clone().unwrap_or_default(),
                        t.language.clone(),
                        t.turn_id.as_str().to_string(),
                    )
                })
                .collect();
            for (speaker, text, language, turn_id) in turns {
                send_to_learner(
                    learner_sink,
                    &ServerMessage::Transcript {
                        speaker,
                        text,
                        is_final: true,
                        turn_id: Some(turn_id),
                        language,
                    },
                )
                .await;
            }
            None
        }
        ClientMessage::Ping { timestamp } => {
            let server_timestamp = Utc::now().timestamp_millis();
            send_to_learner(
                learner_sink,
                &ServerMessage::Pong {
                    timestamp,
                    server_timestamp,
                    latency_ms: server_timestamp - timestamp,
                },
            )
            .await;
            ctx.session.lock().metrics.record_latency_ms(server_timestamp - timestamp);
            None
        }
    }
}

async fn handle_upstream_text(ctx: &Ctx, text: &str, learner_sink: &mut LearnerSink) -> Option<EndReason> {
    let msg = parse_upstream_message(text)?;

    match msg {
        UpstreamMessage::Audio { sample_rate } => {
            if let Some(rate) = sample_rate {
                ctx.session.lock().config.audio.sample_rate = rate;
            }
            None
        }
        UpstreamMessage::AgentResponse { text, is_final } | UpstreamMessage::Transcript { text, is_final } => {
            let events = ctx.session.lock().append_partial(Speaker::Agent, text, is_final, None);
            apply_events(ctx, events, learner_sink).await;
            None
        }
        UpstreamMessage::UserTranscript { text, is_final, language, confidence: _ } => {
            let events = ctx.session.lock().append_partial(Speaker::Learner, text, is_final, language);
            apply_events(ctx, events, learner_sink).await;
            None
        }
        UpstreamMessage::Interruption {} => {
            let events = interrupt_to_learner(&mut ctx.session.lock());
            apply_events(ctx, events, learner_sink).await;
            None
        }
        UpstreamMessage::TurnEnd {} => {
            let events = ctx.session.lock().end_current_turn();
            apply_events(ctx, events, learner_sink).await;
            None
        }
        UpstreamMessage::End {} => Some(EndReason::Completed),
    }
}

async fn handle_assessment_complete(
    ctx: &Ctx,
    turn_id: TurnId,
    result: Result<vrelay_domain::assessor::AssessmentResult, String>,
    learner_sink: &mut LearnerSink,
) {
    match result {
        Ok(assessment) => {
            let events = ctx.session.lock().record_assessment(&turn_id, assessment, ctx.threshold);
            apply_events(ctx, events, learner_sink).await;
        }
        Err(e) => {
            tracing::warn!(turn_id = %turn_id, error = %e, "pronunciation assessment failed");
        }
    }
}

/// Close out the session: flush any still-open turn, emit the summary,
/// publish the end-of-session event, and close both sockets.
async fn end_session(
    ctx: &Ctx,
    reason: EndReason,
    learner_sink: &mut LearnerSink,
    upstream_sink: &mut UpstreamSink,
) {
    let (close_events, summary) = {
        let mut s = ctx.session.lock();
        let mut events = Vec::new();
        if s.current_turn.is_some() {
            events.extend(s.end_current_turn());
        }
        let summary = s.build_session_end(reason);
        s.state = SessionState::Closed;
        (events, summary)
    };
    apply_events(ctx, close_events, learner_sink).await;
    send_to_learner(learner_sink, &summary).await;

    publish_best_effort(
        ctx.events.as_ref(),
        "voice.session.ended",
        json!({ "sessionId": ctx.session_id.as_str(), "reason": reason }),
    )
    .await;

    let _ = upstream_sink.close().await;
    let _ = learner_sink.send(LearnerMessage::Close(None)).await;
}
