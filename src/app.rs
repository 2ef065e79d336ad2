//! Connection handling for both ends of a session.
//!
//! The listener accepts connections forever and serves each one on its own
//! task: handshake, then a receive loop that decrypts frames until the peer
//! leaves. The initiator runs the handshake, then a spawned receive task
//! alongside a send loop fed by the caller's outgoing messages. Whichever of
//! the two finishes first closes the stream and stops the other.
//!
//! Nothing here prints. Lifecycle notices and decrypted text are delivered as
//! [`SessionEvent`]s over an unbounded channel, tagged with the peer's role.

use crate::session::handshake::check_key_bits;
use crate::session::{Handshake, Role, SessionKey};
use crate::transport::{recv_frame, send_frame};
use crate::utils::{FailureKind, MessengerConfig, MessengerError, NetworkError, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

/// Pause after a failed `accept` so persistent errors do not spin the loop
const ACCEPT_BACKOFF: std::time::Duration = std::time::Duration::from_millis(100);

/// Short identifier attached to every log line and event of one connection
pub type ConnectionId = String;

/// Channel the output collaborator listens on
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Notices delivered to the output collaborator
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Listener bound and accepting
    Listening {
        /// Bound address
        address: SocketAddr,
    },
    /// A byte stream to a peer is open
    Connected {
        /// Connection identifier
        connection: ConnectionId,
        /// Remote address
        address: String,
        /// Role of the remote side
        peer: Role,
    },
    /// The handshake finished and payload traffic may flow
    SessionEstablished {
        /// Connection identifier
        connection: ConnectionId,
        /// Role of the remote side
        peer: Role,
        /// Length of the agreed key material
        key_len: usize,
    },
    /// A decrypted inbound message
    MessageReceived {
        /// Connection identifier
        connection: ConnectionId,
        /// Role of the sender
        peer: Role,
        /// Plaintext
        text: String,
    },
    /// The connection failed; `kind` tells the failure classes apart
    Error {
        /// Connection identifier
        connection: ConnectionId,
        /// Role of the remote side
        peer: Role,
        /// Failure class
        kind: FailureKind,
        /// Underlying error
        error: MessengerError,
    },
    /// The connection is closed
    Disconnected {
        /// Connection identifier
        connection: ConnectionId,
        /// Role of the remote side
        peer: Role,
        /// Failure that ended the connection; `None` for an orderly close
        reason: Option<FailureKind>,
        /// Traffic summary
        stats: ConnectionStats,
    },
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listening { address } => write!(f, "Listening on {address}"),
            Self::Connected {
                connection,
                address,
                peer,
            } => write!(f, "[{connection}] Connected with {peer} at {address}"),
            Self::SessionEstablished {
                connection,
                peer,
                key_len,
            } => write!(
                f,
                "[{connection}] Session with {peer} established ({key_len}-byte key)"
            ),
            Self::MessageReceived { peer, text, .. } => write!(f, "{peer}: {text}"),
            Self::Error {
                connection,
                peer,
                kind,
                error,
            } => write!(f, "[{connection}] {kind} error with {peer}: {error}"),
            Self::Disconnected {
                connection,
                peer,
                reason,
                stats,
            } => {
                write!(f, "[{connection}] {peer} disconnected")?;
                if let Some(kind) = reason {
                    write!(f, " ({kind})")?;
                }
                write!(
                    f,
                    " after {}s ({} received, {} sent)",
                    stats.duration().num_seconds(),
                    stats.messages_received,
                    stats.messages_sent
                )
            }
        }
    }
}

/// Traffic summary for one connection
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    /// Connection identifier
    pub connection: ConnectionId,
    /// When the stream was opened
    pub connected_at: DateTime<Utc>,
    /// When the stream was closed
    pub closed_at: DateTime<Utc>,
    /// Frames decrypted successfully
    pub messages_received: u64,
    /// Frames sent
    pub messages_sent: u64,
}

impl ConnectionStats {
    /// How long the connection was open
    pub fn duration(&self) -> chrono::Duration {
        self.closed_at - self.connected_at
    }
}

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Modulus size of the listener's per-connection keypair
    pub key_bits: u64,
    /// Admission limit for concurrently served connections
    pub max_connections: Option<usize>,
    /// Outgoing message that ends the initiator's send loop
    pub quit_command: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from(&MessengerConfig::default())
    }
}

impl From<&MessengerConfig> for ConnectionOptions {
    fn from(config: &MessengerConfig) -> Self {
        Self {
            key_bits: u64::from(config.crypto.key_bits),
            max_connections: config.network.max_connections,
            quit_command: config.session.quit_command.clone(),
        }
    }
}

/// Accepting end of the messenger
pub struct Listener {
    listener: TcpListener,
    options: ConnectionOptions,
    admission: Option<Arc<Semaphore>>,
}

impl Listener {
    /// Bind a listening socket
    ///
    /// # Errors
    ///
    /// * `CryptoError::InvalidParameters` if `options.key_bits` is too small
    ///   to carry a session key
    /// * `NetworkError::BindFailed` if the address cannot be bound
    pub async fn bind<A>(address: A, options: ConnectionOptions) -> Result<Self>
    where
        A: ToSocketAddrs + fmt::Display,
    {
        check_key_bits(options.key_bits)?;
        let label = address.to_string();
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| NetworkError::BindFailed {
                address: label,
                reason: e.to_string(),
            })?;

        let admission = options
            .max_connections
            .map(|limit| Arc::new(Semaphore::new(limit)));

        Ok(Self {
            listener,
            options,
            admission,
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the future is dropped
    ///
    /// Each connection is served on its own task and ends independently of
    /// the others. Dropping this future stops accepting but leaves spawned
    /// connection tasks running to their natural end.
    pub async fn run(self, events: EventSender) -> Result<()> {
        let address = self.local_addr()?;
        log::info!("Listening on {address}");
        emit(&events, SessionEvent::Listening { address });

        loop {
            let permit = match &self.admission {
                Some(gate) => Some(
                    Arc::clone(gate)
                        .acquire_owned()
                        .await
                        .map_err(|e| MessengerError::unexpected(e.to_string()))?,
                ),
                None => None,
            };

            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::warn!("Failed to accept connection: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let key_bits = self.options.key_bits;
            let events = events.clone();
            tokio::spawn(async move {
                handle_connection(stream, peer_addr.to_string(), key_bits, events).await;
                drop(permit);
            });
        }
    }
}

/// Open a TCP connection to a listener
///
/// # Errors
///
/// Returns `NetworkError::ConnectionFailed` if the listener is unreachable
pub async fn connect<A>(address: A) -> Result<TcpStream>
where
    A: ToSocketAddrs + fmt::Display,
{
    let label = address.to_string();
    let stream = TcpStream::connect(address)
        .await
        .map_err(|e| NetworkError::ConnectionFailed {
            peer: label.clone(),
            reason: e.to_string(),
        })?;
    log::info!("Connected to listener at {label}");
    Ok(stream)
}

/// Serve one accepted connection on the listener side
///
/// Runs the handshake and then decrypts frames until the initiator closes
/// the stream. Every failure is reported as an event and ends only this
/// connection.
pub async fn handle_connection<S>(
    mut stream: S,
    address: String,
    key_bits: u64,
    events: EventSender,
) -> ConnectionStats
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let connection = short_id();
    let connected_at = Utc::now();
    let peer = Role::Initiator;
    let received = AtomicU64::new(0);

    log::info!("[{connection}] Connected with {address}");
    emit(
        &events,
        SessionEvent::Connected {
            connection: connection.clone(),
            address,
            peer,
        },
    );

    let mut handshake = Handshake::listener();
    let outcome = match handshake.accept(&mut stream, key_bits).await {
        Ok(key) => {
            log::info!("[{connection}] Derived {}-byte session key", key.len());
            emit(
                &events,
                SessionEvent::SessionEstablished {
                    connection: connection.clone(),
                    peer,
                    key_len: key.len(),
                },
            );
            receive_loop(&mut stream, &key, peer, &connection, &events, &received).await
        }
        Err(error) => Err(error),
    };

    close_quietly(&mut stream, &connection).await;

    let stats = ConnectionStats {
        connection: connection.clone(),
        connected_at,
        closed_at: Utc::now(),
        messages_received: received.load(Ordering::Relaxed),
        messages_sent: 0,
    };
    report_end(&events, &connection, peer, &outcome, &stats);
    stats
}

/// Drive the initiator side of an established connection
///
/// `outgoing` supplies message text; the loop ends on `quit_command`
/// (case-insensitive) or when the sender side of the channel is dropped.
///
/// # Errors
///
/// Returns the error that ended the session, after reporting it as an event.
pub async fn run_initiator<S>(
    mut stream: S,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    quit_command: &str,
    events: EventSender,
) -> Result<ConnectionStats>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let connection = short_id();
    let connected_at = Utc::now();
    let peer = Role::Listener;

    let mut handshake = Handshake::initiator();
    let key = match handshake.initiate(&mut stream).await {
        Ok(key) => key,
        Err(error) => {
            close_quietly(&mut stream, &connection).await;
            let outcome = Err(error);
            let stats = ConnectionStats {
                connection: connection.clone(),
                connected_at,
                closed_at: Utc::now(),
                messages_received: 0,
                messages_sent: 0,
            };
            report_end(&events, &connection, peer, &outcome, &stats);
            return outcome.map(|()| stats);
        }
    };

    log::info!("[{connection}] Sent wrapped {}-byte session key", key.len());
    emit(
        &events,
        SessionEvent::SessionEstablished {
            connection: connection.clone(),
            peer,
            key_len: key.len(),
        },
    );

    let (mut reader, mut writer) = tokio::io::split(stream);
    let received = Arc::new(AtomicU64::new(0));
    let mut receiver = {
        let key = key.clone();
        let events = events.clone();
        let connection = connection.clone();
        let received = Arc::clone(&received);
        tokio::spawn(async move {
            receive_loop(&mut reader, &key, peer, &connection, &events, &received).await
        })
    };

    let mut sent = 0u64;
    let outcome = tokio::select! {
        joined = &mut receiver => {
            log::debug!("[{connection}] Receive loop ended, stopping send loop");
            joined.unwrap_or_else(|e| Err(MessengerError::unexpected(e.to_string())))
        }
        outcome = send_loop(&mut writer, &key, &mut outgoing, quit_command, &mut sent) => {
            log::debug!("[{connection}] Send loop ended, stopping receive loop");
            receiver.abort();
            let _ = receiver.await;
            outcome
        }
    };

    close_quietly(&mut writer, &connection).await;

    let stats = ConnectionStats {
        connection: connection.clone(),
        connected_at,
        closed_at: Utc::now(),
        messages_received: received.load(Ordering::Relaxed),
        messages_sent: sent,
    };
    report_end(&events, &connection, peer, &outcome, &stats);
    outcome.map(|()| stats)
}

/// Decrypt frames until the stream ends
///
/// Returns `Ok(())` on an orderly close. A frame that fails to decrypt ends
/// the loop with the cipher error; it is never skipped.
pub async fn receive_loop<R>(
    reader: &mut R,
    key: &SessionKey,
    peer: Role,
    connection: &str,
    events: &EventSender,
    received: &AtomicU64,
) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    while let Some(frame) = recv_frame(reader).await? {
        let text = key.decrypt(&frame)?;
        received.fetch_add(1, Ordering::Relaxed);
        log::debug!("[{connection}] Received {} byte frame", frame.len());
        emit(
            events,
            SessionEvent::MessageReceived {
                connection: connection.to_string(),
                peer,
                text,
            },
        );
    }
    Ok(())
}

async fn send_loop<W>(
    writer: &mut W,
    key: &SessionKey,
    outgoing: &mut mpsc::UnboundedReceiver<String>,
    quit_command: &str,
    sent: &mut u64,
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    while let Some(message) = outgoing.recv().await {
        if is_quit_command(&message, quit_command) {
            log::info!("Quit command received");
            break;
        }
        let envelope = key.encrypt(&message)?;
        send_frame(writer, &envelope).await?;
        *sent += 1;
    }
    Ok(())
}

/// Whether `input` is the sentinel that ends the send loop
pub fn is_quit_command(input: &str, quit_command: &str) -> bool {
    input.trim().eq_ignore_ascii_case(quit_command.trim())
}

/// Shut the write side down; an already-closed stream is not an error
async fn close_quietly<W>(writer: &mut W, connection: &str)
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if let Err(e) = writer.shutdown().await {
        log::debug!("[{connection}] Stream already closed: {e}");
    }
}

fn report_end(
    events: &EventSender,
    connection: &str,
    peer: Role,
    outcome: &Result<()>,
    stats: &ConnectionStats,
) {
    let reason = match outcome {
        Ok(()) => {
            log::info!("[{connection}] {peer} disconnected");
            None
        }
        Err(error) if error.is_stream_closed() => {
            log::info!("[{connection}] {peer} left: {error}");
            Some(error.kind())
        }
        Err(error) => {
            log::warn!("[{connection}] Connection with {peer} failed: {error}");
            emit(
                events,
                SessionEvent::Error {
                    connection: connection.to_string(),
                    peer,
                    kind: error.kind(),
                    error: error.clone(),
                },
            );
            Some(error.kind())
        }
    };

    emit(
        events,
        SessionEvent::Disconnected {
            connection: connection.to_string(),
            peer,
            reason,
            stats: stats.clone(),
        },
    );
}

fn emit(events: &EventSender, event: SessionEvent) {
    // The output side may already be gone during shutdown
    let _ = events.send(event);
}

fn short_id() -> ConnectionId {
    Uuid::new_v4().to_string()[..8].to_string()
}
