//! Bridge session state machine.
//!
//! [`transition`] is a pure function from `(state, event)` to
//! `(state, actions)`. It never touches a socket; the WebSocket actor feeds it
//! events as they arrive and carries out whatever actions come back. That keeps
//! every lifecycle rule (credential check, pre-handshake audio, teardown in both
//! directions, idempotent close) testable without any I/O.
//!
//! ```text
//! INIT ──credential──▶ AWAITING_UPSTREAM ──upstream open──▶ ACTIVE
//!   │                        │                                 │
//!   └──no credential─────────┴──────── close / error ──────────┴──▶ CLOSED
//! ```

use std::collections::VecDeque;

use super::protocol::{translate_upstream, ClientEvent, ClientMessage, Translation, UpstreamAudioFrame};

pub const MISSING_CREDENTIAL_MESSAGE: &str = "Speech-to-text service is not configured";
pub const UPSTREAM_FAILURE_MESSAGE: &str = "Speech-to-text service connection failed";

/// Lifecycle phase of a bridge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    AwaitingUpstream,
    Active,
    Closed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::AwaitingUpstream => "awaiting_upstream",
            Phase::Active => "active",
            Phase::Closed => "closed",
        }
    }
}

/// Why a timer ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Idle,
    MaxDuration,
}

/// Something that happened to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// The client connection was handed to the session.
    Start { credential_present: bool },
    /// The upstream WebSocket handshake completed.
    UpstreamConnected,
    /// A text frame arrived from the upstream.
    UpstreamMessage(String),
    UpstreamClosed,
    /// Upstream connect failure or socket-level error.
    UpstreamError(String),
    /// A text frame arrived from the client.
    ClientMessage(String),
    ClientClosed,
    ClientError(String),
    Timeout(TimeoutKind),
}

/// Why an input produced nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Discard {
    /// Audio arrived before the upstream was ready and no buffer is configured.
    AudioBeforeReady,
    /// The pre-connect buffer is full.
    PendingAudioOverflow,
    MalformedClientMessage(String),
    MalformedUpstreamMessage(String),
    UnrecognizedUpstreamKind(String),
}

/// A side effect for the session host to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeAction {
    ConnectUpstream,
    SendToClient(ClientEvent),
    SendToUpstream(UpstreamAudioFrame),
    CloseClient,
    CloseUpstream,
    Discard(Discard),
}

/// In-memory state of one bridge session.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeState {
    pub phase: Phase,
    pub upstream_ready: bool,
    pub client_open: bool,
    /// An upstream socket exists or is being opened.
    pub upstream_open: bool,
    sample_rate: u32,
    pending_limit: usize,
    pending: VecDeque<UpstreamAudioFrame>,
}

impl BridgeState {
    /// A fresh session in `INIT`.
    ///
    /// `pending_limit` is how many audio frames to hold while the upstream
    /// handshake is in flight; `0` drops them.
    pub fn new(sample_rate: u32, pending_limit: usize) -> Self {
        Self {
            phase: Phase::Init,
            upstream_ready: false,
            client_open: true,
            upstream_open: false,
            sample_rate,
            pending_limit,
            pending: VecDeque::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    /// Move to `CLOSED`, closing whichever sockets are still open.
    /// `notice` is sent to the client first when it is still open.
    fn shut_down(&mut self, notice: Option<ClientEvent>, actions: &mut Vec<BridgeAction>) {
        if self.client_open {
            if let Some(event) = notice {
                actions.push(BridgeAction::SendToClient(event));
            }
            actions.push(BridgeAction::CloseClient);
            self.client_open = false;
        }
        if self.upstream_open {
            actions.push(BridgeAction::CloseUpstream);
            self.upstream_open = false;
        }
        self.upstream_ready = false;
        self.pending.clear();
        self.phase = Phase::Closed;
    }

    fn forward_to_client(&self, event: ClientEvent, actions: &mut Vec<BridgeAction>) {
        if self.client_open {
            actions.push(BridgeAction::SendToClient(event));
        }
    }
}

/// Apply one event to the session.
pub fn transition(mut state: BridgeState, event: BridgeEvent) -> (BridgeState, Vec<BridgeAction>) {
    let mut actions = Vec::new();

    if state.is_closed() {
        return (state, actions);
    }

    match event {
        BridgeEvent::Start { credential_present } => {
            if state.phase != Phase::Init {
                return (state, actions);
            }
            if credential_present {
                state.phase = Phase::AwaitingUpstream;
                state.upstream_open = true;
                actions.push(BridgeAction::ConnectUpstream);
            } else {
                state.shut_down(Some(ClientEvent::error(MISSING_CREDENTIAL_MESSAGE)), &mut actions);
            }
        }

        BridgeEvent::UpstreamConnected => {
            if state.phase != Phase::AwaitingUpstream {
                return (state, actions);
            }
            state.phase = Phase::Active;
            state.upstream_ready = true;
            state.forward_to_client(ClientEvent::Connected, &mut actions);
            actions.extend(state.pending.drain(..).map(BridgeAction::SendToUpstream));
        }

        BridgeEvent::UpstreamMessage(text) => match translate_upstream(&text) {
            Translation::Forward(event) => state.forward_to_client(event, &mut actions),
            Translation::Unrecognized(kind) => {
                actions.push(BridgeAction::Discard(Discard::UnrecognizedUpstreamKind(kind)))
            }
            Translation::Malformed(reason) => {
                actions.push(BridgeAction::Discard(Discard::MalformedUpstreamMessage(reason)))
            }
        },

        BridgeEvent::UpstreamClosed => {
            // The upstream socket is already gone; nothing to close on that side.
            state.upstream_open = false;
            state.shut_down(None, &mut actions);
        }

        BridgeEvent::UpstreamError(_) => {
            state.shut_down(Some(ClientEvent::error(UPSTREAM_FAILURE_MESSAGE)), &mut actions);
        }

        BridgeEvent::ClientMessage(text) => match ClientMessage::parse(&text) {
            Ok(ClientMessage::Audio { base64, commit }) => {
                let frame = UpstreamAudioFrame::from_client(base64, commit, state.sample_rate);
                match state.phase {
                    Phase::Active if state.upstream_open => {
                        actions.push(BridgeAction::SendToUpstream(frame));
                    }
                    Phase::AwaitingUpstream if state.pending.len() < state.pending_limit => {
                        state.pending.push_back(frame);
                    }
                    Phase::AwaitingUpstream if state.pending_limit > 0 => {
                        actions.push(BridgeAction::Discard(Discard::PendingAudioOverflow));
                    }
                    _ => actions.push(BridgeAction::Discard(Discard::AudioBeforeReady)),
                }
            }
            Err(reason) => {
                actions.push(BridgeAction::Discard(Discard::MalformedClientMessage(reason)))
            }
        },

        BridgeEvent::ClientClosed | BridgeEvent::ClientError(_) => {
            state.client_open = false;
            state.shut_down(None, &mut actions);
        }

        BridgeEvent::Timeout(kind) => {
            let message = match kind {
                TimeoutKind::Idle => "Session closed after inactivity",
                TimeoutKind::MaxDuration => "Session reached its maximum duration",
            };
            state.shut_down(Some(ClientEvent::error(message)), &mut actions);
        }
    }

    (state, actions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> BridgeState {
        BridgeState::new(16000, 0)
    }

    fn run(state: BridgeState, events: Vec<BridgeEvent>) -> (BridgeState, Vec<BridgeAction>) {
        let mut all = Vec::new();
        let mut state = state;
        for event in events {
            let (next, actions) = transition(state, event);
            state = next;
            all.extend(actions);
        }
        (state, all)
    }

    fn active() -> BridgeState {
        run(
            fresh(),
            vec![BridgeEvent::Start { credential_present: true }, BridgeEvent::UpstreamConnected],
        )
        .0
    }

    fn audio(base64: &str, commit: Option<bool>) -> BridgeEvent {
        let text = match commit {
            Some(commit) => format!(r#"{{"type":"audio","base64":"{base64}","commit":{commit}}}"#),
            None => format!(r#"{{"type":"audio","base64":"{base64}"}}"#),
        };
        BridgeEvent::ClientMessage(text)
    }

    fn upstream_frames(actions: &[BridgeAction]) -> Vec<&UpstreamAudioFrame> {
        actions
            .iter()
            .filter_map(|action| match action {
                BridgeAction::SendToUpstream(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    fn client_events(actions: &[BridgeAction]) -> Vec<&ClientEvent> {
        actions
            .iter()
            .filter_map(|action| match action {
                BridgeAction::SendToClient(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_missing_credential_closes_without_upstream() {
        let (state, actions) = transition(fresh(), BridgeEvent::Start { credential_present: false });

        assert_eq!(state.phase, Phase::Closed);
        assert!(!state.client_open);
        assert_eq!(
            actions,
            vec![
                BridgeAction::SendToClient(ClientEvent::error(MISSING_CREDENTIAL_MESSAGE)),
                BridgeAction::CloseClient,
            ]
        );
        assert!(!actions.contains(&BridgeAction::ConnectUpstream));
    }

    #[test]
    fn test_start_requests_upstream() {
        let (state, actions) = transition(fresh(), BridgeEvent::Start { credential_present: true });
        assert_eq!(state.phase, Phase::AwaitingUpstream);
        assert!(!state.upstream_ready);
        assert_eq!(actions, vec![BridgeAction::ConnectUpstream]);
    }

    #[test]
    fn test_upstream_connected_notifies_client() {
        let (state, actions) = run(
            fresh(),
            vec![BridgeEvent::Start { credential_present: true }, BridgeEvent::UpstreamConnected],
        );
        assert_eq!(state.phase, Phase::Active);
        assert!(state.upstream_ready);
        assert_eq!(
            actions,
            vec![BridgeAction::ConnectUpstream, BridgeAction::SendToClient(ClientEvent::Connected)]
        );
    }

    #[test]
    fn test_audio_before_ready_is_dropped() {
        let (state, actions) = run(
            fresh(),
            vec![
                BridgeEvent::Start { credential_present: true },
                audio("AAA=", Some(true)),
                BridgeEvent::UpstreamConnected,
            ],
        );
        assert!(upstream_frames(&actions).is_empty());
        assert!(actions.contains(&BridgeAction::Discard(Discard::AudioBeforeReady)));
        assert_eq!(state.pending_frames(), 0);
    }

    #[test]
    fn test_pending_buffer_flushes_in_order() {
        let (_, actions) = run(
            BridgeState::new(16000, 2),
            vec![
                BridgeEvent::Start { credential_present: true },
                audio("ONE=", None),
                audio("TWO=", Some(true)),
                audio("THREE=", None),
                BridgeEvent::UpstreamConnected,
            ],
        );

        assert!(actions.contains(&BridgeAction::Discard(Discard::PendingAudioOverflow)));
        let frames = upstream_frames(&actions);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].audio_base_64, "ONE=");
        assert_eq!(frames[1].audio_base_64, "TWO=");
        assert!(frames[1].commit);

        // The client hears "connected" before anything is flushed upstream.
        let connected = actions
            .iter()
            .position(|a| *a == BridgeAction::SendToClient(ClientEvent::Connected))
            .unwrap();
        let first_frame = actions
            .iter()
            .position(|a| matches!(a, BridgeAction::SendToUpstream(_)))
            .unwrap();
        assert!(connected < first_frame);
    }

    #[test]
    fn test_active_audio_maps_one_to_one() {
        let (_, actions) = run(
            active(),
            vec![audio("AAA=", Some(false)), audio("BBB=", Some(true)), audio("CCC=", None)],
        );

        let frames = upstream_frames(&actions);
        assert_eq!(frames.len(), 3);
        assert_eq!(
            *frames[0],
            UpstreamAudioFrame { audio_base_64: "AAA=".to_string(), commit: false, sample_rate: 16000 }
        );
        assert!(frames[1].commit);
        assert!(!frames[2].commit);
    }

    #[test]
    fn test_malformed_client_message_is_discarded() {
        let (state, actions) = run(
            active(),
            vec![
                BridgeEvent::ClientMessage("{not json".to_string()),
                BridgeEvent::ClientMessage(r#"{"type":"ping"}"#.to_string()),
            ],
        );
        assert_eq!(state.phase, Phase::Active);
        assert_eq!(actions.len(), 2);
        assert!(actions
            .iter()
            .all(|a| matches!(a, BridgeAction::Discard(Discard::MalformedClientMessage(_)))));
    }

    #[test]
    fn test_upstream_order_is_preserved() {
        let (_, actions) = run(
            active(),
            vec![
                BridgeEvent::UpstreamMessage(r#"{"message_type":"partial_transcript","text":"he"}"#.into()),
                BridgeEvent::UpstreamMessage(r#"{"message_type":"partial_transcript","text":"hel"}"#.into()),
                BridgeEvent::UpstreamMessage(r#"{"message_type":"committed_transcript","text":"hello"}"#.into()),
            ],
        );

        assert_eq!(
            client_events(&actions),
            vec![
                &ClientEvent::Partial { text: "he".to_string() },
                &ClientEvent::Partial { text: "hel".to_string() },
                &ClientEvent::Final { text: "hello".to_string() },
            ]
        );
    }

    #[test]
    fn test_unrecognized_upstream_is_not_forwarded() {
        let (_, actions) = transition(
            active(),
            BridgeEvent::UpstreamMessage(r#"{"message_type":"vad_state"}"#.into()),
        );
        assert_eq!(
            actions,
            vec![BridgeAction::Discard(Discard::UnrecognizedUpstreamKind("vad_state".to_string()))]
        );
    }

    #[test]
    fn test_upstream_semantic_error_keeps_session() {
        let (state, actions) = transition(
            active(),
            BridgeEvent::UpstreamMessage(r#"{"message_type":"quota_exceeded","message":"limit"}"#.into()),
        );
        assert_eq!(state.phase, Phase::Active);
        assert_eq!(actions, vec![BridgeAction::SendToClient(ClientEvent::error("limit"))]);
    }

    #[test]
    fn test_upstream_close_closes_client_silently() {
        let (state, actions) = transition(active(), BridgeEvent::UpstreamClosed);
        assert_eq!(state.phase, Phase::Closed);
        assert_eq!(actions, vec![BridgeAction::CloseClient]);
    }

    #[test]
    fn test_upstream_transport_error_reports_then_closes() {
        let (state, actions) = transition(active(), BridgeEvent::UpstreamError("reset".into()));
        assert!(state.is_closed());
        assert_eq!(
            actions,
            vec![
                BridgeAction::SendToClient(ClientEvent::error(UPSTREAM_FAILURE_MESSAGE)),
                BridgeAction::CloseClient,
                BridgeAction::CloseUpstream,
            ]
        );
    }

    #[test]
    fn test_upstream_connect_failure_reports_then_closes() {
        let (_, actions) = run(
            fresh(),
            vec![
                BridgeEvent::Start { credential_present: true },
                BridgeEvent::UpstreamError("dns".into()),
            ],
        );
        assert_eq!(
            actions,
            vec![
                BridgeAction::ConnectUpstream,
                BridgeAction::SendToClient(ClientEvent::error(UPSTREAM_FAILURE_MESSAGE)),
                BridgeAction::CloseClient,
                BridgeAction::CloseUpstream,
            ]
        );
    }

    #[test]
    fn test_client_close_closes_upstream() {
        let (state, actions) = transition(active(), BridgeEvent::ClientClosed);
        assert!(state.is_closed());
        assert!(!state.client_open);
        assert_eq!(actions, vec![BridgeAction::CloseUpstream]);
    }

    #[test]
    fn test_client_close_during_handshake_cancels_upstream() {
        let (_, actions) = run(
            fresh(),
            vec![BridgeEvent::Start { credential_present: true }, BridgeEvent::ClientError("eof".into())],
        );
        assert_eq!(actions, vec![BridgeAction::ConnectUpstream, BridgeAction::CloseUpstream]);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let (closed, _) = transition(active(), BridgeEvent::ClientClosed);

        let (state, actions) = run(
            closed,
            vec![
                BridgeEvent::ClientClosed,
                BridgeEvent::UpstreamClosed,
                BridgeEvent::UpstreamError("late".into()),
                BridgeEvent::ClientError("late".into()),
                BridgeEvent::Timeout(TimeoutKind::Idle),
                BridgeEvent::UpstreamConnected,
                BridgeEvent::UpstreamMessage(r#"{"message_type":"partial_transcript","text":"x"}"#.into()),
                audio("AAA=", None),
            ],
        );
        assert!(state.is_closed());
        assert!(actions.is_empty());
    }

    #[test]
    fn test_timeout_notifies_and_closes_both() {
        let (state, actions) = transition(active(), BridgeEvent::Timeout(TimeoutKind::Idle));
        assert!(state.is_closed());
        assert_eq!(actions.len(), 3);
        assert!(matches!(actions[0], BridgeAction::SendToClient(ClientEvent::Error { .. })));
        assert_eq!(actions[1], BridgeAction::CloseClient);
        assert_eq!(actions[2], BridgeAction::CloseUpstream);
    }

    #[test]
    fn test_duplicate_start_is_ignored() {
        let (state, actions) = run(
            fresh(),
            vec![
                BridgeEvent::Start { credential_present: true },
                BridgeEvent::Start { credential_present: true },
            ],
        );
        assert_eq!(state.phase, Phase::AwaitingUpstream);
        assert_eq!(actions, vec![BridgeAction::ConnectUpstream]);
    }
}
