//! Connection session: one persistent push-channel connection.
//!
//! This is the entry point for driving the push channel directly. It
//! manages the TCP (optionally TLS) connection, the auth handshake, and
//! emits [`SessionEvent`]s. Supports plaintext and TLS transports.
//!
//! ## Handshake
//!
//! On open the session immediately sends `auth{userId}` and waits for
//! `auth_success`. Commands issued before that ack are buffered and
//! flushed in FIFO order the moment the session becomes ready — never
//! dropped silently.
//!
//! ## Reconnection
//!
//! The session does not reconnect on its own. Listen for
//! [`SessionEvent::Disconnected`] and open a fresh session; the facade's
//! supervisory loop does this with exponential backoff and replays the
//! subscription registry's current topic.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::error::SendError;
use crate::event::SessionEvent;
use crate::frame::{self, ClientFrame, LobbyId, UserId};

/// The already-authenticated identity this session speaks for.
/// Immutable for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

/// Configuration for connecting to a push-channel server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    /// Use TLS.
    pub tls: bool,
    /// Skip TLS certificate verification (for self-signed certs).
    pub tls_insecure: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4820".to_string(),
            tls: false,
            tls_insecure: false,
        }
    }
}

/// Lifecycle of a session. Exactly one transport handle is live at a time;
/// transitions are serialized inside the session task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingAuthAck,
    Ready,
    Closing,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingAuthAck => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Closing => "closing",
        }
    }
}

/// Commands the consumer can send to the session.
#[derive(Debug)]
pub enum Command {
    Subscribe(LobbyId),
    Unsubscribe(LobbyId),
    Typing(LobbyId),
    Send(ClientFrame),
    Close,
}

/// A handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub async fn subscribe(&self, lobby_id: LobbyId) -> Result<(), SendError> {
        self.send_cmd(Command::Subscribe(lobby_id)).await
    }

    pub async fn unsubscribe(&self, lobby_id: LobbyId) -> Result<(), SendError> {
        self.send_cmd(Command::Unsubscribe(lobby_id)).await
    }

    /// Signal that the local user is typing in `lobby_id`. Fire-and-forget
    /// on the wire; throttling is the caller's job.
    pub async fn typing(&self, lobby_id: LobbyId) -> Result<(), SendError> {
        self.send_cmd(Command::Typing(lobby_id)).await
    }

    /// Enqueue an arbitrary frame. Buffered until the session is ready.
    pub async fn send(&self, frame: ClientFrame) -> Result<(), SendError> {
        self.send_cmd(Command::Send(frame)).await
    }

    /// Tear the session down. Best-effort: an `unsubscribe_lobby` for the
    /// active topic is attempted if the transport is still writable, and
    /// a failure to send it is swallowed — the server reaps dead
    /// connections on its own.
    pub async fn close(&self) -> Result<(), SendError> {
        self.send_cmd(Command::Close).await
    }

    async fn send_cmd(&self, cmd: Command) -> Result<(), SendError> {
        self.cmd_tx.send(cmd).await.map_err(|_| SendError::Closed)
    }
}

/// A connection that has completed TCP (and optionally TLS) but has not
/// started the auth handshake yet.
pub enum EstablishedConnection {
    Plain(TcpStream),
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

/// Establish the TCP (and optionally TLS) connection.
///
/// Done before the session task starts so connect errors surface to the
/// caller eagerly instead of as a `Disconnected` event.
pub async fn establish_connection(config: &ConnectConfig) -> Result<EstablishedConnection> {
    tracing::debug!(addr = %config.server_addr, tls = config.tls, "connecting");
    let tcp = TcpStream::connect(&config.server_addr)
        .await
        .map_err(|e| anyhow::anyhow!("TCP connect to {} failed: {e}", config.server_addr))?;

    if config.tls {
        let tls_config = if config.tls_insecure {
            tracing::debug!("TLS: insecure mode (skipping cert verification)");
            rustls_insecure_config()
        } else {
            rustls_default_config()
        };
        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = config.server_addr.split(':').next().unwrap_or("localhost");
        let dns_name = rustls::pki_types::ServerName::try_from(server_name.to_string())?;
        let tls_stream = connector
            .connect(dns_name, tcp)
            .await
            .map_err(|e| anyhow::anyhow!("TLS handshake with {} failed: {e}", config.server_addr))?;
        Ok(EstablishedConnection::Tls(tls_stream))
    } else {
        Ok(EstablishedConnection::Plain(tcp))
    }
}

/// Connect and run a session over an established connection.
pub fn connect_with_stream(
    conn: EstablishedConnection,
    identity: Identity,
) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
    match conn {
        EstablishedConnection::Plain(tcp) => connect_io(tcp, identity),
        EstablishedConnection::Tls(tls) => connect_io(tls, identity),
    }
}

/// Connect to a server and run a session.
pub async fn connect(
    config: &ConnectConfig,
    identity: Identity,
) -> Result<(SessionHandle, mpsc::Receiver<SessionEvent>)> {
    let conn = establish_connection(config).await?;
    Ok(connect_with_stream(conn, identity))
}

/// Run a session over any bidirectional byte stream.
///
/// This is the seam the TCP/TLS constructors go through; it also lets
/// tests (and custom transports) drive a session over in-memory pipes.
pub fn connect_io<S>(stream: S, identity: Identity) -> (SessionHandle, mpsc::Receiver<SessionEvent>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);

    let handle = SessionHandle { cmd_tx };

    tokio::spawn(async move {
        let (reader, writer) = tokio::io::split(stream);
        let _ = event_tx.send(SessionEvent::Connected).await;
        if let Err(e) = run_session(
            BufReader::new(reader),
            writer,
            identity,
            event_tx.clone(),
            cmd_rx,
        )
        .await
        {
            let _ = event_tx
                .send(SessionEvent::Disconnected {
                    reason: e.to_string(),
                })
                .await;
        }
    });

    (handle, event_rx)
}

async fn run_session<R, W>(
    mut reader: R,
    mut writer: W,
    identity: Identity,
    event_tx: mpsc::Sender<SessionEvent>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Identity goes out first; nothing else is written until the ack.
    write_frame(&mut writer, &ClientFrame::Auth { user_id: identity.user_id }).await?;

    let mut ready = false;
    // Sends issued before the ack, flushed FIFO once ready.
    let mut pending: Vec<ClientFrame> = Vec::new();
    // The topic the server currently knows about, for close-time cleanup.
    let mut subscribed: Option<LobbyId> = None;
    let mut line_buf = String::new();

    loop {
        tokio::select! {
            result = reader.read_line(&mut line_buf) => {
                let n = result?;
                if n == 0 {
                    let _ = event_tx.send(SessionEvent::Disconnected {
                        reason: "connection closed by server".to_string(),
                    }).await;
                    break;
                }

                match frame::decode(&line_buf) {
                    Ok(crate::frame::ServerFrame::AuthSuccess) if !ready => {
                        ready = true;
                        let _ = event_tx.send(SessionEvent::Ready).await;
                        for f in pending.drain(..) {
                            note_subscription(&f, &mut subscribed);
                            write_frame(&mut writer, &f).await?;
                        }
                    }
                    Ok(f) => {
                        let _ = event_tx.send(SessionEvent::Frame(f)).await;
                    }
                    Err(e) => {
                        // Malformed frames never stop frame processing.
                        tracing::warn!(error = %e, line = %line_buf.trim_end(), "discarding malformed frame");
                    }
                }

                line_buf.clear();
            }
            Some(cmd) = cmd_rx.recv() => {
                match cmd {
                    Command::Close => {
                        if let Some(lobby_id) = subscribed.take() {
                            let _ = write_frame(&mut writer, &ClientFrame::UnsubscribeLobby { lobby_id }).await;
                        }
                        let _ = event_tx.send(SessionEvent::Disconnected {
                            reason: "closed".to_string(),
                        }).await;
                        break;
                    }
                    cmd => {
                        let Some(frame) = frame_for(cmd, &identity) else {
                            continue;
                        };
                        if !ready {
                            buffer_frame(&mut pending, frame);
                        } else if !is_redundant(&frame, subscribed) {
                            note_subscription(&frame, &mut subscribed);
                            write_frame(&mut writer, &frame).await?;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Translate a command into its wire frame.
fn frame_for(cmd: Command, identity: &Identity) -> Option<ClientFrame> {
    match cmd {
        Command::Subscribe(lobby_id) => Some(ClientFrame::SubscribeLobby { lobby_id }),
        Command::Unsubscribe(lobby_id) => Some(ClientFrame::UnsubscribeLobby { lobby_id }),
        Command::Typing(lobby_id) => Some(ClientFrame::Typing {
            lobby_id,
            user_id: identity.user_id,
            username: identity.username.clone(),
        }),
        Command::Send(frame) => Some(frame),
        Command::Close => None,
    }
}

/// Subscribing to the topic already on the wire, or unsubscribing from one
/// that is not, sends nothing.
fn is_redundant(frame: &ClientFrame, subscribed: Option<LobbyId>) -> bool {
    match frame {
        ClientFrame::SubscribeLobby { lobby_id } => subscribed == Some(*lobby_id),
        ClientFrame::UnsubscribeLobby { lobby_id } => subscribed != Some(*lobby_id),
        _ => false,
    }
}

fn note_subscription(frame: &ClientFrame, subscribed: &mut Option<LobbyId>) {
    match frame {
        ClientFrame::SubscribeLobby { lobby_id } => *subscribed = Some(*lobby_id),
        ClientFrame::UnsubscribeLobby { lobby_id } => {
            if *subscribed == Some(*lobby_id) {
                *subscribed = None;
            }
        }
        _ => {}
    }
}

/// Queue a pre-ready frame. A subscribe requested before the ack is sent
/// as part of the flush exactly once, so repeats are dropped here, and an
/// unsubscribe cancels a still-queued subscribe instead of chasing it
/// over the wire.
fn buffer_frame(pending: &mut Vec<ClientFrame>, frame: ClientFrame) {
    match &frame {
        ClientFrame::SubscribeLobby { .. } => {
            if pending.contains(&frame) {
                return;
            }
        }
        ClientFrame::UnsubscribeLobby { lobby_id } => {
            let subscribe = ClientFrame::SubscribeLobby { lobby_id: *lobby_id };
            if let Some(pos) = pending.iter().position(|f| *f == subscribe) {
                pending.remove(pos);
                return;
            }
        }
        _ => {}
    }
    pending.push(frame);
}

async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &ClientFrame,
) -> std::io::Result<()> {
    writer.write_all(frame::encode(frame).as_bytes()).await
}

fn install_crypto_provider() {
    // ring works everywhere; aws-lc-rs is the default on desktop.
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn rustls_default_config() -> rustls::ClientConfig {
    install_crypto_provider();

    let mut root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let native = rustls_native_certs::load_native_certs();
    if !native.errors.is_empty() {
        tracing::debug!(errors = native.errors.len(), "some native roots failed to load");
    }
    for cert in native.certs {
        let _ = root_store.add(cert);
    }
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn rustls_insecure_config() -> rustls::ClientConfig {
    install_crypto_provider();
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth()
}

#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::CryptoProvider::get_default()
            .map(|p| p.signature_verification_algorithms.supported_schemes())
            .unwrap_or_default()
    }
}
