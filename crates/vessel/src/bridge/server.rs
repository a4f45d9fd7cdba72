//! Manager side of the bridge.
//!
//! A [`BridgeServer`] serves one caller. It reads requests and forwards
//! session events from a single loop, so the `Created` acknowledgement for a
//! session is always on the wire before any `Data` or `Exit` for it.

use protocol::messages::{Created, Data, ErrorMessage, Exit};
use protocol::{Envelope, ErrorCode, FrameReader, FrameWriter, Message, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::BridgeError;
use crate::config::SessionConfig;
use crate::session::{
    EventSink, SessionError, SessionEvent, SessionManager, SessionManagerImpl,
};

/// Serves bridge requests for one connection.
///
/// Sessions created through a server belong to its connection and are
/// destroyed when the connection ends.
pub struct BridgeServer {
    manager: SessionManagerImpl,
    events: mpsc::Receiver<SessionEvent>,
    sequence: u64,
}

impl BridgeServer {
    /// Creates a server with its own session registry.
    pub fn new(config: SessionConfig) -> Self {
        let (sink, events) = EventSink::new();
        Self {
            manager: SessionManagerImpl::new(config, sink),
            events,
            sequence: 0,
        }
    }

    /// The session manager behind this server.
    pub fn manager(&self) -> &SessionManagerImpl {
        &self.manager
    }

    /// Serves until the peer disconnects.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> Result<(), BridgeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.serve_until(reader, writer, CancellationToken::new())
            .await
    }

    /// Serves until the peer disconnects or `shutdown` fires.
    ///
    /// Every session is destroyed before this returns.
    pub async fn serve_until<R, W>(
        mut self,
        reader: R,
        writer: W,
        shutdown: CancellationToken,
    ) -> Result<(), BridgeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = FrameReader::new(reader);
        let mut writer = FrameWriter::new(writer);

        let result = self.run(&mut reader, &mut writer, &shutdown).await;

        self.manager.destroy_all().await;
        let _ = writer.shutdown().await;

        match result {
            Err(BridgeError::Protocol(e)) if e.is_disconnect() => {
                tracing::debug!(error = %e, "Bridge peer went away");
                Ok(())
            }
            other => other,
        }
    }

    async fn run<R, W>(
        &mut self,
        reader: &mut FrameReader<R>,
        writer: &mut FrameWriter<W>,
        shutdown: &CancellationToken,
    ) -> Result<(), BridgeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    tracing::debug!("Bridge server shutting down");
                    return Ok(());
                }

                incoming = reader.read_envelope() => {
                    match incoming? {
                        Some(envelope) => {
                            if let Some(reply) = self.handle(envelope).await {
                                writer.write_envelope(&reply).await?;
                            }
                        }
                        None => {
                            tracing::info!("Bridge peer disconnected");
                            return Ok(());
                        }
                    }
                }

                Some(event) = self.events.recv() => {
                    let envelope = self.event_envelope(event);
                    writer.write_envelope(&envelope).await?;
                }
            }
        }
    }

    /// Applies one caller message. Returns the reply for requests.
    async fn handle(&mut self, envelope: Envelope) -> Option<Envelope> {
        let sequence = envelope.sequence;

        if envelope.version != PROTOCOL_VERSION {
            tracing::warn!(
                version = envelope.version,
                expected = PROTOCOL_VERSION,
                kind = envelope.payload.kind(),
                "Protocol version mismatch"
            );
            if matches!(envelope.payload, Message::Create(_)) {
                return Some(error_reply(
                    sequence,
                    ErrorCode::InvalidRequest,
                    format!("unsupported protocol version {}", envelope.version),
                    envelope.payload.session_id().map(str::to_owned),
                ));
            }
            return None;
        }

        match envelope.payload {
            Message::Create(create) => {
                let reply = match self
                    .manager
                    .create(&create.session_id, create.cols, create.rows, create.cwd.as_deref())
                    .await
                {
                    Ok(pid) => Message::Created(Created {
                        session_id: create.session_id,
                        pid,
                    }),
                    Err(e) => {
                        tracing::warn!(
                            session_id = %create.session_id,
                            error = %e,
                            "Create failed"
                        );
                        Message::Error(ErrorMessage {
                            code: error_code(&e),
                            message: e.to_string(),
                            context: Some(create.session_id),
                        })
                    }
                };
                Some(Envelope::new(sequence, reply))
            }
            Message::Write(write) => {
                if let Err(e) = self.manager.write(&write.session_id, &write.data).await {
                    tracing::warn!(session_id = %write.session_id, error = %e, "Write failed");
                }
                None
            }
            Message::Resize(resize) => {
                if let Err(e) = self
                    .manager
                    .resize(&resize.session_id, resize.cols, resize.rows)
                    .await
                {
                    tracing::warn!(session_id = %resize.session_id, error = %e, "Resize failed");
                }
                None
            }
            Message::Destroy(destroy) => {
                if let Err(e) = self.manager.destroy(&destroy.session_id).await {
                    tracing::warn!(session_id = %destroy.session_id, error = %e, "Destroy failed");
                }
                None
            }
            other => {
                tracing::warn!(kind = other.kind(), "Ignoring unexpected message from caller");
                None
            }
        }
    }

    fn event_envelope(&mut self, event: SessionEvent) -> Envelope {
        self.sequence += 1;
        let message = match event {
            SessionEvent::Data { id, data } => Message::Data(Data {
                session_id: id,
                data,
            }),
            SessionEvent::Exit { id, exit_code } => {
                tracing::debug!(session_id = %id, exit_code = exit_code, "Forwarding exit");
                Message::Exit(Exit {
                    session_id: id,
                    exit_code,
                })
            }
        };
        Envelope::new(self.sequence, message)
    }
}

fn error_reply(
    sequence: u64,
    code: ErrorCode,
    message: String,
    context: Option<String>,
) -> Envelope {
    Envelope::new(
        sequence,
        Message::Error(ErrorMessage {
            code,
            message,
            context,
        }),
    )
}

fn error_code(error: &SessionError) -> ErrorCode {
    match error {
        SessionError::SpawnFailed(_) | SessionError::Io(_) => ErrorCode::SpawnFailed,
        SessionError::AlreadyExists(_) => ErrorCode::AlreadyExists,
        SessionError::LimitReached(_) => ErrorCode::LimitReached,
        _ => ErrorCode::Internal,
    }
}

#[cfg(unix)]
pub use listener::BridgeListener;

#[cfg(unix)]
mod listener {
    use std::io;
    use std::path::{Path, PathBuf};

    use tokio::net::UnixListener;
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    use super::BridgeServer;
    use crate::bridge::BridgeError;
    use crate::config::SessionConfig;

    /// Accepts bridge connections on a Unix domain socket.
    pub struct BridgeListener {
        listener: UnixListener,
        path: PathBuf,
        config: SessionConfig,
    }

    impl BridgeListener {
        /// Bind the listener to the specified socket path.
        ///
        /// Parent directories are created as needed and a stale socket file
        /// at the path is removed first.
        pub async fn bind(path: &Path, config: SessionConfig) -> Result<Self, io::Error> {
            if let Some(parent) = path.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            if path.exists() {
                std::fs::remove_file(path)?;
            }

            let listener = UnixListener::bind(path)?;
            tracing::info!(path = %path.display(), "Bridge listening");

            Ok(Self {
                listener,
                path: path.to_path_buf(),
                config,
            })
        }

        /// The socket path this listener is bound to.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Accepts connections until `shutdown` fires, then waits for every
        /// connection to wind down and removes the socket file.
        pub async fn run(self, shutdown: CancellationToken) -> Result<(), BridgeError> {
            let tracker = TaskTracker::new();
            let mut next_connection: u64 = 0;

            let result = loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break Ok(()),
                    accepted = self.listener.accept() => {
                        let stream = match accepted {
                            Ok((stream, _addr)) => stream,
                            Err(e) => break Err(BridgeError::Io(e)),
                        };

                        next_connection += 1;
                        let connection = next_connection;
                        let server = BridgeServer::new(self.config.clone());
                        let token = shutdown.child_token();

                        tracing::info!(connection = connection, "Bridge client connected");
                        tracker.spawn(async move {
                            let (reader, writer) = stream.into_split();
                            if let Err(e) = server.serve_until(reader, writer, token).await {
                                tracing::warn!(connection = connection, error = %e, "Bridge connection failed");
                            }
                            tracing::info!(connection = connection, "Bridge client disconnected");
                        });
                    }
                }
            };

            tracker.close();
            tracker.wait().await;

            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::debug!(path = %self.path.display(), error = %e, "Socket already removed");
            }

            result
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use protocol::messages::{Create, Destroy, Write};
    use protocol::MessagePattern;
    use std::time::Duration;
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};
    use tokio::time::timeout;

    struct Peer {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: FrameWriter<WriteHalf<DuplexStream>>,
    }

    impl Peer {
        async fn send(&mut self, sequence: u64, message: Message) {
            self.writer
                .write_envelope(&Envelope::new(sequence, message))
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> Envelope {
            timeout(Duration::from_secs(5), self.reader.read_envelope())
                .await
                .expect("timed out waiting for envelope")
                .unwrap()
                .expect("stream closed")
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            default_shell: Some("/bin/sh".to_string()),
            ..SessionConfig::default()
        }
    }

    fn start(config: SessionConfig) -> (Peer, tokio::task::JoinHandle<Result<(), BridgeError>>) {
        let (ours, theirs) = duplex(64 * 1024);
        let (server_read, server_write) = split(theirs);
        let handle = tokio::spawn(BridgeServer::new(config).serve(server_read, server_write));

        let (read, write) = split(ours);
        let peer = Peer {
            reader: FrameReader::new(read),
            writer: FrameWriter::new(write),
        };
        (peer, handle)
    }

    fn create(id: &str) -> Message {
        Message::Create(Create {
            session_id: id.to_string(),
            cols: 80,
            rows: 24,
            cwd: None,
        })
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            error_code(&SessionError::SpawnFailed("x".into())),
            ErrorCode::SpawnFailed
        );
        assert_eq!(
            error_code(&SessionError::AlreadyExists("t1".into())),
            ErrorCode::AlreadyExists
        );
        assert_eq!(
            error_code(&SessionError::LimitReached(1)),
            ErrorCode::LimitReached
        );
        assert_eq!(
            error_code(&SessionError::Bridge("x".into())),
            ErrorCode::Internal
        );
    }

    #[tokio::test]
    async fn test_create_acknowledged_before_output() {
        let (mut peer, _handle) = start(config());

        peer.send(7, create("t1")).await;

        let ack = peer.recv().await;
        assert_eq!(ack.sequence, 7);
        match ack.payload {
            Message::Created(created) => {
                assert_eq!(created.session_id, "t1");
                assert!(created.pid > 0);
            }
            other => panic!("expected created, got {:?}", other),
        }

        peer.send(
            8,
            Message::Destroy(Destroy {
                session_id: "t1".to_string(),
            }),
        )
        .await;

        loop {
            let envelope = peer.recv().await;
            // Fire-and-forget messages are never answered.
            assert_eq!(envelope.payload.pattern(), MessagePattern::Push);
            if let Message::Exit(exit) = envelope.payload {
                assert_eq!(exit.session_id, "t1");
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let (mut peer, _handle) = start(config());

        peer.send(1, create("t1")).await;
        assert!(matches!(peer.recv().await.payload, Message::Created(_)));

        peer.send(2, create("t1")).await;
        let reply = loop {
            let envelope = peer.recv().await;
            if envelope.sequence == 2 {
                if let Message::Error(_) = envelope.payload {
                    break envelope;
                }
            }
        };
        match reply.payload {
            Message::Error(err) => {
                assert_eq!(err.code, ErrorCode::AlreadyExists);
                assert_eq!(err.context.as_deref(), Some("t1"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_reported() {
        let config = SessionConfig {
            default_shell: Some("/nonexistent/shell".to_string()),
            ..SessionConfig::default()
        };
        let (mut peer, _handle) = start(config);

        peer.send(3, create("t1")).await;
        let reply = peer.recv().await;
        assert_eq!(reply.sequence, 3);
        assert!(matches!(
            reply.payload,
            Message::Error(ErrorMessage {
                code: ErrorCode::SpawnFailed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let (mut peer, _handle) = start(config());

        let mut envelope = Envelope::new(4, create("t1"));
        envelope.version = PROTOCOL_VERSION + 1;
        peer.writer.write_envelope(&envelope).await.unwrap();

        let reply = peer.recv().await;
        assert_eq!(reply.sequence, 4);
        assert!(matches!(
            reply.payload,
            Message::Error(ErrorMessage {
                code: ErrorCode::InvalidRequest,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_session_messages_ignored() {
        let (mut peer, _handle) = start(config());

        peer.send(
            1,
            Message::Write(Write {
                session_id: "nonexistent-id".to_string(),
                data: b"ls\n".to_vec(),
            }),
        )
        .await;
        peer.send(
            2,
            Message::Destroy(Destroy {
                session_id: "nonexistent-id".to_string(),
            }),
        )
        .await;
        // A push message from the caller is ignored too.
        peer.send(
            3,
            Message::Exit(Exit {
                session_id: "t1".to_string(),
                exit_code: 0,
            }),
        )
        .await;

        // The connection is still healthy.
        peer.send(4, create("t1")).await;
        let reply = peer.recv().await;
        assert_eq!(reply.sequence, 4);
        assert!(matches!(reply.payload, Message::Created(_)));
    }

    #[tokio::test]
    async fn test_disconnect_destroys_sessions() {
        let (mut peer, handle) = start(config());

        peer.send(1, create("t1")).await;
        assert!(matches!(peer.recv().await.payload, Message::Created(_)));

        drop(peer);
        let result = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_listener_accepts_and_cleans_up() {
        use tokio::net::UnixStream;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bridge.sock");

        // A stale file at the socket path is replaced.
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"stale").unwrap();

        let listener = BridgeListener::bind(&path, config()).await.unwrap();
        assert_eq!(listener.path(), path.as_path());

        let shutdown = CancellationToken::new();
        let run = tokio::spawn(listener.run(shutdown.clone()));

        let stream = UnixStream::connect(&path).await.unwrap();
        let (read, write) = stream.into_split();
        let mut reader = FrameReader::new(read);
        let mut writer = FrameWriter::new(write);

        writer
            .write_envelope(&Envelope::new(1, create("t1")))
            .await
            .unwrap();
        let reply = timeout(Duration::from_secs(5), reader.read_envelope())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(reply.payload, Message::Created(_)));

        shutdown.cancel();
        let result = timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert!(!path.exists());
    }
}
