//! Component J: the hot-reload WebSocket server core (§4.J). Accepts browser
//! connections, validates their identifying query string, and relays
//! [`protocol::ServerMessage`]s pushed by the scheduler while forwarding
//! decoded [`protocol::ClientMessage`]s back out to the caller.
//!
//! The `tokio-tungstenite` dependency was declared but unused in the teacher's
//! own retrieved sources; this module is what actually wires it up.

pub mod protocol;
pub mod registry;

use std::{collections::HashMap, sync::Arc};

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpStream},
    process::Command,
    sync::{mpsc, Mutex},
};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::{BrowserUiPosition, CompilationMode, Env};

use self::{
    protocol::{ClientMessage, OpenEditorError, ServerMessage},
    registry::{ClientId, Registry},
};

#[derive(Debug, Error)]
pub enum HotServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection query string missing required field {0:?}")]
    MissingQueryField(&'static str),

    #[error("unknown target {0:?}")]
    UnknownTarget(String),

    #[error("token mismatch")]
    TokenMismatch,
}

/// Everything one incoming connection's identifying query string must carry
/// (§6.4's path shape: `/?elmWatchVersion=<X>&targetName=<T>&elmCompiledTimestamp=<ms>`,
/// plus the startup token).
#[derive(Debug, Clone)]
struct ConnectionIdentity {
    target_name: String,
    elm_compiled_timestamp: u64,
}

fn parse_identity(uri: &str, expected_token: &str) -> Result<ConnectionIdentity, HotServerError> {
    let url = url::Url::options()
        .base_url(Some(&url::Url::parse("ws://elm-watch.invalid").unwrap()))
        .parse(uri)
        .map_err(|_| HotServerError::MissingQueryField("elmWatchVersion"))?;
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    let target_name =
        params.get("targetName").cloned().ok_or(HotServerError::MissingQueryField("targetName"))?;
    let elm_compiled_timestamp = params
        .get("elmCompiledTimestamp")
        .and_then(|s| s.parse().ok())
        .ok_or(HotServerError::MissingQueryField("elmCompiledTimestamp"))?;
    let token = params.get("webSocketToken").cloned().unwrap_or_default();
    if token != expected_token {
        return Err(HotServerError::TokenMismatch);
    }

    Ok(ConnectionIdentity { target_name, elm_compiled_timestamp })
}

/// Close codes for unrecoverable mismatches (§6.4).
mod close_code {
    pub const UNKNOWN_TARGET: u16 = 4000;
    pub const TOKEN_MISMATCH: u16 = 4001;
}

/// The running server: a shared [`Registry`] plus the startup token every
/// connection must present.
pub struct HotServer {
    registry: Arc<Mutex<Registry>>,
    token: String,
    known_targets: Arc<Mutex<Vec<String>>>,
}

impl HotServer {
    pub fn new(token: String, known_targets: Vec<String>) -> Self {
        Self { registry: Arc::new(Mutex::new(Registry::new())), token, known_targets: Arc::new(Mutex::new(known_targets)) }
    }

    pub fn registry(&self) -> Arc<Mutex<Registry>> {
        Arc::clone(&self.registry)
    }

    #[instrument(skip_all, fields(addr = %addr))]
    pub async fn serve(self: Arc<Self>, addr: std::net::SocketAddr) -> Result<(), HotServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HotServerError::Bind { addr: addr.to_string(), source })?;
        info!(%addr, "hot websocket server listening");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream).await {
                    debug!(%peer, error = %err, "connection ended");
                }
            });
        }
    }

    #[instrument(skip_all)]
    async fn handle_connection(&self, stream: TcpStream) -> Result<(), HotServerError> {
        let mut request_uri = String::new();
        let callback =
            |req: &tokio_tungstenite::tungstenite::handshake::server::Request,
             response: tokio_tungstenite::tungstenite::handshake::server::Response| {
                request_uri = req.uri().to_string();
                Ok(response)
            };
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;

        let identity = match parse_identity(&request_uri, &self.token) {
            Ok(identity) => identity,
            Err(HotServerError::TokenMismatch) => {
                close_with(ws_stream, close_code::TOKEN_MISMATCH, "token mismatch").await;
                return Err(HotServerError::TokenMismatch);
            }
            Err(err) => {
                close_with(ws_stream, close_code::UNKNOWN_TARGET, "bad connection query").await;
                return Err(err);
            }
        };

        if !self.known_targets.lock().await.iter().any(|t| t == &identity.target_name) {
            close_with(ws_stream, close_code::UNKNOWN_TARGET, "unknown target").await;
            return Err(HotServerError::UnknownTarget(identity.target_name));
        }

        let (mut write, mut read) = ws_stream.split();
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<ServerMessage>();
        let client_id = {
            let mut registry = self.registry.lock().await;
            registry.register(
                identity.target_name.clone(),
                CompilationMode::Standard,
                BrowserUiPosition::default(),
                outbox_tx,
            )
        };
        debug!(?client_id, target = %identity.target_name, compiled_timestamp = identity.elm_compiled_timestamp, "client connected");

        let writer_task = tokio::spawn(async move {
            while let Some(message) = outbox_rx.recv().await {
                let wire = protocol::encode(&message);
                if write.send(WsMessage::Text(wire)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(frame) = read.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(_) => break,
            };
            let text = match frame {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => break,
                _ => continue,
            };
            if let Ok(client_message) = serde_json::from_str::<ClientMessage>(&text) {
                self.handle_client_message(client_id, client_message).await;
            }
        }

        self.registry.lock().await.unregister(client_id);
        writer_task.abort();
        Ok(())
    }

    #[instrument(skip_all, fields(?client_id))]
    async fn handle_client_message(&self, client_id: ClientId, message: ClientMessage) {
        let mut registry = self.registry.lock().await;
        match message {
            ClientMessage::ChangedCompilationMode { compilation_mode } => {
                if let Some(client) = registry.client_mut(client_id) {
                    client.compilation_mode = compilation_mode;
                }
            }
            ClientMessage::ChangedBrowserUiPosition { browser_ui_position } => {
                if let Some(client) = registry.client_mut(client_id) {
                    client.browser_ui_position = browser_ui_position;
                }
            }
            ClientMessage::ChangedOpenErrorOverlay { open_error_overlay } => {
                if let Some(client) = registry.client_mut(client_id) {
                    client.open_error_overlay = open_error_overlay;
                }
            }
            ClientMessage::FocusedTab => {
                if let Some(client) = registry.client_mut(client_id) {
                    client.send(ServerMessage::FocusedTabAcknowledged);
                }
            }
            ClientMessage::PressedOpenEditor { file, line, column } => {
                let client = registry.client_mut(client_id);
                let Some(client) = client else { return };
                let outcome = open_editor(&file, line, column).await;
                if let Err(error) = outcome {
                    client.send(ServerMessage::OpenEditorFailed { error });
                }
            }
        }
    }
}

async fn close_with<S>(mut ws_stream: tokio_tungstenite::WebSocketStream<S>, code: u16, reason: &str)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
    let _ = ws_stream
        .close(Some(CloseFrame { code: CloseCode::from(code), reason: reason.to_string().into() }))
        .await;
}

/// §4.J "open-in-editor": spawns `$EDITOR file:line:column` (or the
/// configured equivalent command).
async fn open_editor(file: &str, line: u32, column: u32) -> Result<(), OpenEditorError> {
    let env = Env::from_process();
    let Some(editor) = env.editor else {
        return Err(OpenEditorError::EnvNotSet);
    };
    let target = format!("{file}:{line}:{column}");
    let status = Command::new(&editor)
        .arg(&target)
        .status()
        .await
        .map_err(|err| OpenEditorError::CommandFailed { message: err.to_string() })?;
    if status.success() {
        Ok(())
    } else {
        Err(OpenEditorError::CommandFailed { message: format!("exit status {status}") })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_connection_uri() {
        let uri = "/?elmWatchVersion=1.0.0&targetName=Main&elmCompiledTimestamp=123&webSocketToken=tok";
        let identity = parse_identity(uri, "tok").unwrap();
        assert_eq!(identity.target_name, "Main");
        assert_eq!(identity.elm_compiled_timestamp, 123);
    }

    #[test]
    fn rejects_a_mismatched_token() {
        let uri = "/?elmWatchVersion=1.0.0&targetName=Main&elmCompiledTimestamp=123&webSocketToken=wrong";
        assert!(matches!(parse_identity(uri, "tok"), Err(HotServerError::TokenMismatch)));
    }

    #[test]
    fn rejects_a_missing_target_name() {
        let uri = "/?elmWatchVersion=1.0.0&elmCompiledTimestamp=123&webSocketToken=tok";
        assert!(matches!(parse_identity(uri, "tok"), Err(HotServerError::MissingQueryField("targetName"))));
    }
}
