//! # WebSocket Bridge Handler
//!
//! Clients connect to `/ws` and stream base64 audio as JSON text frames. Each
//! connection becomes one [`BridgeSocket`] actor, which opens exactly one
//! upstream STT connection and relays between the two until either side goes away.
//!
//! ## WebSocket Protocol:
//! - **Client → Server**: `{"type":"audio","base64":"...","commit":false}`
//! - **Server → Client**: `connected`, `partial`, `final`, `session_started`, `error`
//!
//! ## Actor Model:
//! The actor's mailbox serializes everything that happens to a session: client
//! frames arrive through the `StreamHandler`, upstream activity arrives as
//! [`UpstreamSignal`] messages. Each one is turned into a [`BridgeEvent`], run
//! through the pure state machine, and the resulting actions are carried out here.

use crate::bridge::upstream::{self, UpstreamLink, UpstreamSignal};
use crate::bridge::{transition, BridgeAction, BridgeEvent, BridgeState, Discard, TimeoutKind};
use crate::config::BridgeOptions;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest gap between idle checks.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// WebSocket actor for one bridge session.
pub struct BridgeSocket {
    /// Unique id for log correlation
    id: Uuid,

    /// Lifecycle state, only ever replaced through `transition`
    state: BridgeState,

    /// Credential and protocol parameters captured at session start
    options: BridgeOptions,

    /// The upstream task, once one has been started
    upstream: Option<UpstreamLink>,

    /// Shared counters
    app_state: AppState,

    /// Last client or upstream text frame, for the idle timer
    last_activity: Instant,
}

impl BridgeSocket {
    pub fn new(options: BridgeOptions, app_state: AppState) -> Self {
        let state = BridgeState::new(options.upstream.sample_rate, options.pending_audio_frames);
        Self {
            id: Uuid::new_v4(),
            state,
            options,
            upstream: None,
            app_state,
            last_activity: Instant::now(),
        }
    }

    /// Run one event through the state machine and perform what it asks for.
    fn dispatch(&mut self, event: BridgeEvent, ctx: &mut ws::WebsocketContext<Self>) {
        let before = self.state.phase;
        let (next, actions) = transition(self.state.clone(), event);
        self.state = next;

        if before != self.state.phase {
            debug!(
                session_id = %self.id,
                from = before.as_str(),
                to = self.state.phase.as_str(),
                "bridge session transition"
            );
        }

        for action in actions {
            self.perform(action, ctx);
        }

        if self.state.is_closed() {
            ctx.stop();
        }
    }

    fn perform(&mut self, action: BridgeAction, ctx: &mut ws::WebsocketContext<Self>) {
        match action {
            BridgeAction::ConnectUpstream => self.connect_upstream(ctx),
            BridgeAction::SendToClient(event) => match event.to_json() {
                Ok(json) => {
                    ctx.text(json);
                    self.app_state.record_event_to_client();
                }
                Err(err) => {
                    warn!(session_id = %self.id, kind = event.kind(), %err, "failed to encode client event");
                    self.app_state.record_send_failure();
                }
            },
            BridgeAction::SendToUpstream(frame) => {
                let sent = frame
                    .to_json()
                    .map_err(|err| err.to_string())
                    .and_then(|json| match &self.upstream {
                        Some(link) => link.send_text(json),
                        None => Err("no upstream link".to_string()),
                    });
                match sent {
                    Ok(()) => self.app_state.record_frame_to_upstream(),
                    Err(err) => {
                        warn!(session_id = %self.id, %err, "dropped audio frame for upstream");
                        self.app_state.record_send_failure();
                    }
                }
            }
            BridgeAction::CloseClient => {
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Normal,
                    description: None,
                }));
            }
            BridgeAction::CloseUpstream => {
                if let Some(link) = self.upstream.take() {
                    debug!(session_id = %self.id, "closing upstream link");
                    link.close();
                }
            }
            BridgeAction::Discard(reason) => {
                self.app_state.record_discarded_message();
                match reason {
                    Discard::AudioBeforeReady => {
                        debug!(session_id = %self.id, "audio received before upstream was ready, dropped")
                    }
                    Discard::PendingAudioOverflow => {
                        warn!(session_id = %self.id, "pre-connect audio buffer full, frame dropped")
                    }
                    Discard::MalformedClientMessage(err) => {
                        warn!(session_id = %self.id, %err, "ignoring malformed client message")
                    }
                    Discard::MalformedUpstreamMessage(err) => {
                        warn!(session_id = %self.id, %err, "ignoring malformed upstream message")
                    }
                    Discard::UnrecognizedUpstreamKind(kind) => {
                        debug!(session_id = %self.id, %kind, "ignoring upstream message")
                    }
                }
            }
        }
    }

    fn connect_upstream(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let credential = self.options.credential.as_deref().unwrap_or_default();
        match upstream::build_request(&self.options.upstream, credential) {
            Ok(request) => {
                info!(session_id = %self.id, url = %self.options.upstream.url, "connecting upstream");
                let recipient = ctx.address().recipient();
                self.upstream = Some(UpstreamLink::open(request, recipient));
            }
            Err(err) => {
                // Delivered through the mailbox so the current transition finishes first.
                ctx.notify(UpstreamSignal::Failed(err.to_string()));
            }
        }
    }

    fn start_timers(&self, ctx: &mut ws::WebsocketContext<Self>) {
        if self.options.idle_timeout_secs > 0 {
            let idle_timeout = Duration::from_secs(self.options.idle_timeout_secs);
            ctx.run_interval(IDLE_CHECK_INTERVAL.min(idle_timeout), move |act, ctx| {
                if act.last_activity.elapsed() >= idle_timeout {
                    info!(session_id = %act.id, "bridge session idle, closing");
                    act.dispatch(BridgeEvent::Timeout(TimeoutKind::Idle), ctx);
                }
            });
        }

        if self.options.max_session_secs > 0 {
            ctx.run_later(Duration::from_secs(self.options.max_session_secs), |act, ctx| {
                info!(session_id = %act.id, "bridge session reached maximum duration");
                act.dispatch(BridgeEvent::Timeout(TimeoutKind::MaxDuration), ctx);
            });
        }
    }
}

impl Actor for BridgeSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Called when the client connection has been upgraded.
    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.id, "bridge session started");
        self.app_state.session_started();

        let credential_present = self.options.has_credential();
        if !credential_present {
            warn!(session_id = %self.id, "upstream credential missing, refusing session");
            self.app_state.record_session_rejected();
        }

        self.start_timers(ctx);
        self.dispatch(BridgeEvent::Start { credential_present }, ctx);
    }

    /// Called on every exit path. Whatever is left of the upstream goes with us.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(link) = self.upstream.take() {
            link.close();
        }
        self.app_state.session_stopped();
        info!(
            session_id = %self.id,
            phase = self.state.phase.as_str(),
            pending_frames = self.state.pending_frames(),
            "bridge session stopped"
        );
    }
}

/// Handle incoming client WebSocket frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for BridgeSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_activity = Instant::now();
                self.dispatch(BridgeEvent::ClientMessage(text.to_string()), ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                // The client protocol is JSON text frames only.
                debug!(session_id = %self.id, bytes = data.len(), "ignoring binary client frame");
                self.app_state.record_discarded_message();
            }
            Ok(ws::Message::Ping(data)) => {
                if self.state.client_open {
                    ctx.pong(&data);
                }
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.id, ?reason, "client closed");
                self.dispatch(BridgeEvent::ClientClosed, ctx);
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.id, "unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(session_id = %self.id, %err, "client protocol error");
                self.dispatch(BridgeEvent::ClientError(err.to_string()), ctx);
            }
        }
    }

    /// The client stream ended without a close frame.
    fn finished(&mut self, ctx: &mut Self::Context) {
        self.dispatch(BridgeEvent::ClientClosed, ctx);
        ctx.stop();
    }
}

/// Handle signals from the upstream task.
impl Handler<UpstreamSignal> for BridgeSocket {
    type Result = ();

    fn handle(&mut self, signal: UpstreamSignal, ctx: &mut Self::Context) {
        match signal {
            UpstreamSignal::Connected => {
                info!(session_id = %self.id, "upstream connected");
                self.dispatch(BridgeEvent::UpstreamConnected, ctx);
            }
            UpstreamSignal::Text(text) => {
                self.last_activity = Instant::now();
                self.dispatch(BridgeEvent::UpstreamMessage(text), ctx);
            }
            UpstreamSignal::Closed => {
                info!(session_id = %self.id, "upstream closed");
                // The task has already exited; nothing left to close.
                self.upstream = None;
                self.dispatch(BridgeEvent::UpstreamClosed, ctx);
            }
            UpstreamSignal::Failed(err) => {
                warn!(session_id = %self.id, %err, "upstream failure");
                self.app_state.record_upstream_failure();
                self.dispatch(BridgeEvent::UpstreamError(err), ctx);
            }
            UpstreamSignal::SendFailed(err) => {
                warn!(session_id = %self.id, %err, "upstream write failed");
                self.app_state.record_send_failure();
            }
        }
    }
}

/// WebSocket endpoint handler.
///
/// Refuses the upgrade with 503 when the bridge is at its session limit.
/// Client frames up to `session.max_frame_bytes` are accepted.
/// Otherwise the credential is read from the environment right now, at session
/// start, and handed to the new actor.
pub async fn bridge_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let config = app_state.get_config();
    let active = app_state.active_sessions() as usize;

    if active >= config.session.max_concurrent_sessions {
        warn!(active, limit = config.session.max_concurrent_sessions, "refusing bridge session");
        return Err(AppError::Unavailable("session limit reached".to_string()));
    }

    debug!(peer = ?req.connection_info().peer_addr(), "bridge upgrade request");

    let options = BridgeOptions::from_env(&config);
    let socket = BridgeSocket::new(options, app_state.get_ref().clone());

    ws::WsResponseBuilder::new(socket, &req, stream)
        .frame_size(config.session.max_frame_bytes)
        .start()
        .map_err(|err| AppError::BadRequest(err.to_string()))
}
