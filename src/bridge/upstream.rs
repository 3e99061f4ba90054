//! The upstream half of a bridge session.
//!
//! One tokio task per session owns the vendor WebSocket. It reports what
//! happens on that socket back to the session actor as [`UpstreamSignal`]s and
//! writes whatever the session pushes into its command channel. Dropping the
//! sending half of that channel is how the session asks for a clean close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix::prelude::*;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;

/// Header the vendor reads the API key from.
pub const CREDENTIAL_HEADER: &str = "xi-api-key";

/// How long the handshake may take before the session gives up on it.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// What the upstream task reports back to its session.
#[derive(Message, Debug, Clone, PartialEq)]
#[rtype(result = "()")]
pub enum UpstreamSignal {
    Connected,
    Text(String),
    Closed,
    /// Connect failure or socket error. The task has exited.
    Failed(String),
    /// A single write failed. The task keeps running.
    SendFailed(String),
}

/// Realtime endpoint URL with the fixed session parameters attached.
pub fn session_url(config: &UpstreamConfig) -> String {
    let separator = if config.url.contains('?') { '&' } else { '?' };
    let mut url = format!(
        "{}{}model_id={}&audio_format={}&commit_strategy={}\
         &vad_silence_threshold_secs={}&vad_threshold={}\
         &min_speech_duration_ms={}&min_silence_duration_ms={}",
        config.url,
        separator,
        config.model_id,
        config.audio_format,
        config.commit_strategy,
        config.vad_silence_threshold_secs,
        config.vad_threshold,
        config.min_speech_duration_ms,
        config.min_silence_duration_ms,
    );
    if let Some(language) = &config.language_code {
        url.push_str("&language_code=");
        url.push_str(language);
    }
    url
}

/// Handshake request for one session, authenticated with `credential`.
pub fn build_request(config: &UpstreamConfig, credential: &str) -> Result<Request, UpstreamError> {
    if credential.trim().is_empty() {
        return Err(UpstreamError::MissingCredential);
    }
    let mut request = session_url(config).into_client_request()?;
    let mut value = HeaderValue::from_str(credential)?;
    value.set_sensitive(true);
    request.headers_mut().insert(CREDENTIAL_HEADER, value);
    Ok(request)
}

/// Handle the session keeps on its upstream task.
pub struct UpstreamLink {
    commands: Option<mpsc::UnboundedSender<Message>>,
    task: JoinHandle<()>,
    /// Set by the task as soon as the handshake completes, before the
    /// `Connected` signal is even queued for the session.
    connected: Arc<AtomicBool>,
}

impl UpstreamLink {
    /// Start the upstream task. Signals go to `events`.
    pub fn open(request: Request, events: Recipient<UpstreamSignal>) -> Self {
        let (commands, outbound) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run(request, outbound, events, connected.clone()));
        Self {
            commands: Some(commands),
            task,
            connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queue a text frame. Fails only when the task has already exited.
    pub fn send_text(&self, text: String) -> Result<(), String> {
        match &self.commands {
            Some(commands) => commands
                .send(Message::Text(text))
                .map_err(|_| "upstream task has exited".to_string()),
            None => Err("upstream link is closed".to_string()),
        }
    }

    /// Close the vendor socket.
    ///
    /// Once the handshake has completed the task is left to send a close frame.
    /// A handshake still in flight is aborted so no vendor session is opened on
    /// behalf of a client that left.
    pub fn close(mut self) {
        self.commands.take();
        if !self.is_connected() {
            self.task.abort();
        }
    }
}

/// Body of the upstream task.
async fn run(
    request: Request,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: Recipient<UpstreamSignal>,
    connected: Arc<AtomicBool>,
) {
    let socket = match tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request)).await {
        Ok(Ok((socket, _response))) => socket,
        Ok(Err(err)) => {
            events.do_send(UpstreamSignal::Failed(err.to_string()));
            return;
        }
        Err(_) => {
            events.do_send(UpstreamSignal::Failed(format!(
                "handshake timed out after {}s",
                CONNECT_TIMEOUT.as_secs()
            )));
            return;
        }
    };

    // No await between the handshake finishing and this store, so an abort
    // can never land on a connected socket.
    connected.store(true, Ordering::Release);
    events.do_send(UpstreamSignal::Connected);
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(message) => {
                    if let Err(err) = write.send(message).await {
                        events.do_send(UpstreamSignal::SendFailed(err.to_string()));
                    }
                }
                None => {
                    // The session dropped its sender.
                    debug!("closing upstream socket on session request");
                    let _ = write.close().await;
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => events.do_send(UpstreamSignal::Text(text)),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "upstream sent close");
                    let _ = write.close().await;
                    events.do_send(UpstreamSignal::Closed);
                    break;
                }
                // Pings are answered by tungstenite; binary frames are not part of the protocol.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    events.do_send(UpstreamSignal::Failed(err.to_string()));
                    break;
                }
                None => {
                    events.do_send(UpstreamSignal::Closed);
                    break;
                }
            },
        }
    }
}
