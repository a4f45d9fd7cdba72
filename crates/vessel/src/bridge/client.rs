//! Caller side of the bridge.
//!
//! A [`BridgeClient`] speaks to a [`BridgeServer`](super::BridgeServer) over
//! one byte stream and implements [`SessionManager`], so the layout engine
//! can drive remote sessions exactly like local ones.
//!
//! `create` is a request: it waits for the `Created` or `Error` reply that
//! echoes its sequence number. `write`, `resize` and `destroy` are sent and
//! forgotten. Output and exit events are routed by session id to whoever
//! called [`BridgeClient::subscribe`] for that id; events for sessions
//! nobody subscribed to are dropped. Subscriptions are unbounded so the
//! router never waits on a slow subscriber and replies keep flowing.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use protocol::messages::{Create, Destroy, Resize, Write};
use protocol::{
    Envelope, ErrorCode, FrameReader, FrameWriter, Message, MessagePattern, ProtocolError,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::session::{SessionError, SessionEvent, SessionId, SessionManager};

/// Default timeout for requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// State shared between the client handle and its reader task.
struct Shared {
    writer: Mutex<FrameWriter<BoxedWriter>>,
    sequence: AtomicU64,
    /// Requests waiting for a reply, by sequence number.
    pending: DashMap<u64, oneshot::Sender<Message>>,
    subscribers: DashMap<SessionId, mpsc::UnboundedSender<SessionEvent>>,
    /// Sessions this client created that have not exited yet.
    owned: DashSet<SessionId>,
    closed: AtomicBool,
}

/// A session manager living on the other end of a bridge connection.
pub struct BridgeClient {
    shared: Arc<Shared>,
    reader_task: JoinHandle<()>,
    timeout: Duration,
}

impl BridgeClient {
    /// Connect to a bridge listener at the specified socket path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    /// This typically indicates that the daemon is not running.
    #[cfg(unix)]
    pub async fn connect(path: &Path) -> Result<Self, io::Error> {
        let stream = tokio::net::UnixStream::connect(path).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self::new(reader, writer))
    }

    /// Connect with a custom timeout for both connecting and requests.
    #[cfg(unix)]
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, io::Error> {
        let stream = tokio::time::timeout(timeout, tokio::net::UnixStream::connect(path))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connection timed out"))??;
        let (reader, writer) = stream.into_split();
        let mut client = Self::new(reader, writer);
        client.set_timeout(timeout);
        Ok(client)
    }

    /// Wraps an already-open stream pair and starts routing incoming events.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared {
            writer: Mutex::new(FrameWriter::new(Box::new(writer) as BoxedWriter)),
            sequence: AtomicU64::new(0),
            pending: DashMap::new(),
            subscribers: DashMap::new(),
            owned: DashSet::new(),
            closed: AtomicBool::new(false),
        });

        let reader_task = tokio::spawn(route_incoming(FrameReader::new(reader), shared.clone()));

        Self {
            shared,
            reader_task,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Set the timeout for requests.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Receives the output and exit of one session.
    ///
    /// Subscribe before creating the session to see its first bytes. A new
    /// subscription for the same id replaces the previous one. The channel
    /// closes after the session's exit or when the connection ends.
    pub fn subscribe(&self, id: &str) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.is_closed() {
            self.shared.subscribers.insert(id.to_string(), tx);
        }
        rx
    }

    /// Stops routing events for a session.
    pub fn unsubscribe(&self, id: &str) {
        self.shared.subscribers.remove(id);
    }

    /// Whether the connection to the server has ended.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Ids of sessions created through this client that have not exited.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .shared
            .owned
            .iter()
            .map(|id| id.key().clone())
            .collect();
        ids.sort();
        ids
    }

    fn next_sequence(&self) -> u64 {
        self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn send(&self, sequence: u64, message: Message) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Bridge("bridge connection closed".to_string()));
        }
        let envelope = Envelope::new(sequence, message);
        self.shared.writer.lock().await.write_envelope(&envelope).await?;
        Ok(())
    }

    async fn notify(&self, message: Message) -> Result<(), SessionError> {
        let sequence = self.next_sequence();
        self.send(sequence, message).await
    }

    async fn request(&self, message: Message) -> Result<Message, SessionError> {
        let sequence = self.next_sequence();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(sequence, tx);

        if let Err(e) = self.send(sequence, message).await {
            self.shared.pending.remove(&sequence);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(SessionError::Bridge(
                "bridge connection closed before reply".to_string(),
            )),
            Err(_) => {
                self.shared.pending.remove(&sequence);
                Err(SessionError::Bridge(format!(
                    "request {} timed out after {:?}",
                    sequence, self.timeout
                )))
            }
        }
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

impl SessionManager for BridgeClient {
    async fn create(
        &self,
        id: &str,
        cols: u16,
        rows: u16,
        cwd: Option<&str>,
    ) -> Result<u32, SessionError> {
        let reply = self
            .request(Message::Create(Create {
                session_id: id.to_string(),
                cols,
                rows,
                cwd: cwd.map(str::to_owned),
            }))
            .await?;

        match reply {
            Message::Created(created) if created.session_id == id => {
                self.shared.owned.insert(created.session_id);
                Ok(created.pid)
            }
            Message::Error(err) => {
                tracing::debug!(session_id = %id, code = ?err.code, "Create rejected");
                Err(remote_error(id, err.code, err.message))
            }
            other => Err(ProtocolError::UnexpectedResponse(format!(
                "{} in reply to create {}",
                other.kind(),
                id
            ))
            .into()),
        }
    }

    async fn write(&self, id: &str, data: &[u8]) -> Result<(), SessionError> {
        self.notify(Message::Write(Write {
            session_id: id.to_string(),
            data: data.to_vec(),
        }))
        .await
    }

    async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.notify(Message::Resize(Resize {
            session_id: id.to_string(),
            cols,
            rows,
        }))
        .await
    }

    async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        self.notify(Message::Destroy(Destroy {
            session_id: id.to_string(),
        }))
        .await
    }

    async fn destroy_all(&self) {
        for id in self.session_ids() {
            if let Err(e) = self.destroy(&id).await {
                tracing::warn!(session_id = %id, error = %e, "Failed to destroy remote session");
            }
        }
    }
}

/// Reads envelopes until the stream ends and hands each to its consumer.
async fn route_incoming<R: AsyncRead + Unpin>(mut reader: FrameReader<R>, shared: Arc<Shared>) {
    loop {
        let envelope = match reader.read_envelope().await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                tracing::info!("Bridge server closed the connection");
                break;
            }
            Err(e) if e.is_disconnect() => {
                tracing::info!(error = %e, "Bridge server went away");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Bridge stream failed");
                break;
            }
        };

        match envelope.payload.pattern() {
            MessagePattern::Response => {
                match shared.pending.remove(&envelope.sequence) {
                    Some((_, waiter)) => {
                        let _ = waiter.send(envelope.payload);
                    }
                    None => tracing::debug!(
                        sequence = envelope.sequence,
                        kind = envelope.payload.kind(),
                        "Reply with no waiting request"
                    ),
                }
            }
            MessagePattern::Push => {
                if let Some(event) = into_event(envelope.payload) {
                    deliver(&shared, event);
                }
            }
            MessagePattern::Request | MessagePattern::FireAndForget => {
                tracing::warn!(
                    kind = envelope.payload.kind(),
                    "Ignoring unexpected message from server"
                );
            }
        }
    }

    shared.closed.store(true, Ordering::Release);
    // Dropping the waiters fails every outstanding request.
    shared.pending.clear();
    shared.subscribers.clear();
    shared.owned.clear();
}

fn deliver(shared: &Shared, event: SessionEvent) {
    let exited = event.is_exit();
    if exited {
        shared.owned.remove(event.id());
    }

    let subscriber = shared.subscribers.get(event.id()).map(|tx| tx.clone());
    let Some(tx) = subscriber else {
        tracing::trace!(session_id = %event.id(), "No subscriber, dropping event");
        return;
    };

    let id = event.id().to_string();
    if tx.send(event).is_err() || exited {
        shared
            .subscribers
            .remove_if(&id, |_, current| current.same_channel(&tx));
    }
}

fn into_event(message: Message) -> Option<SessionEvent> {
    match message {
        Message::Data(data) => Some(SessionEvent::Data {
            id: data.session_id,
            data: data.data,
        }),
        Message::Exit(exit) => Some(SessionEvent::Exit {
            id: exit.session_id,
            exit_code: exit.exit_code,
        }),
        _ => None,
    }
}

fn remote_error(id: &str, code: ErrorCode, message: String) -> SessionError {
    match code {
        ErrorCode::SpawnFailed => SessionError::SpawnFailed(message),
        ErrorCode::AlreadyExists => SessionError::AlreadyExists(id.to_string()),
        ErrorCode::LimitReached => SessionError::LimitReached(limit_in(&message).unwrap_or(0)),
        ErrorCode::InvalidRequest | ErrorCode::Internal => SessionError::Bridge(message),
    }
}

/// First number in a server error message.
fn limit_in(message: &str) -> Option<usize> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .find(|part| !part.is_empty())
        .and_then(|part| part.parse().ok())
}
