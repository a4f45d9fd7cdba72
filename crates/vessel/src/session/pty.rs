//! PTY session management.
//!
//! This module provides the core PTY spawning and I/O functionality.
//! A session represents a single terminal session with a shell process.
//!
//! Each session runs three dedicated threads:
//!
//! - a writer that feeds queued input into the PTY, so callers never block
//!   on a shell that is not reading;
//! - a reader that forwards output chunks to the session's [`EventSink`] in
//!   the order the process produced them;
//! - a waiter that reaps the child, gives the reader a short grace period to
//!   drain whatever the process wrote before exiting, then reports the exit
//!   code exactly once. The exit is only reported after any output send
//!   still in flight has completed, so it is always the last event.

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex as StdMutex, MutexGuard};
use std::thread;
use std::time::Duration;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{oneshot, Mutex};

use super::sink::{EventSink, SessionEvent};
use super::{SessionError, SessionId};

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// How long the waiter lets the reader drain after the child exits.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Exit code reported when the child's status cannot be collected.
const UNKNOWN_EXIT_CODE: i32 = -1;

/// Parameters for spawning a session.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Shell executable.
    pub shell: String,
    /// Terminal width in columns.
    pub cols: u16,
    /// Terminal height in rows.
    pub rows: u16,
    /// Working directory of the shell.
    pub cwd: PathBuf,
    /// Value of `TERM` for the shell.
    pub term: String,
    /// Extra environment variables on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

struct Terminal {
    master: Box<dyn MasterPty + Send>,
    cols: u16,
    rows: u16,
}

/// A PTY session with a shell process.
///
/// Dropping a session closes the master side of the PTY, which hangs up the
/// shell if it is still running.
pub struct Session {
    id: SessionId,
    pid: u32,
    cwd: PathBuf,
    terminal: Mutex<Terminal>,
    input: std_mpsc::Sender<Vec<u8>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    running: Arc<AtomicBool>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("cwd", &self.cwd)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Spawns a shell behind a new PTY and starts forwarding its output.
    ///
    /// Returns the session and a receiver that resolves with the exit code
    /// once the process has exited and its output has been drained.
    pub fn spawn(
        id: SessionId,
        options: SpawnOptions,
        sink: EventSink,
    ) -> Result<(Self, oneshot::Receiver<i32>), SessionError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&options.shell);
        cmd.cwd(&options.cwd);
        cmd.env("TERM", &options.term);
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(format!("{}: {}", options.shell, e)))?;

        // The reader only sees EOF once every slave handle is closed.
        drop(pair.slave);

        let pid = child.process_id().unwrap_or(0);
        let mut killer = child.clone_killer();

        let io = pair
            .master
            .try_clone_reader()
            .and_then(|reader| pair.master.take_writer().map(|writer| (reader, writer)));
        let (reader, writer) = match io {
            Ok(io) => io,
            Err(e) => {
                let _ = killer.kill();
                return Err(SessionError::SpawnFailed(e.to_string()));
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        // Set once the exit is about to be reported. Held by the reader for
        // the whole of each delivery.
        let closed = Arc::new(StdMutex::new(false));
        let (input_tx, input_rx) = std_mpsc::channel::<Vec<u8>>();

        let writer_thread = {
            let id = id.clone();
            thread::Builder::new()
                .name(format!("pty-writer-{}", short_id(&id)))
                .spawn(move || write_loop(writer, input_rx, &id))
        };
        if let Err(e) = writer_thread {
            let _ = killer.kill();
            return Err(SessionError::SpawnFailed(e.to_string()));
        }
        let (drained_tx, drained_rx) = std_mpsc::channel::<()>();
        let (exit_tx, exit_rx) = oneshot::channel();

        let reader_thread = {
            let id = id.clone();
            let closed = Arc::clone(&closed);
            thread::Builder::new()
                .name(format!("pty-reader-{}", short_id(&id)))
                .spawn(move || {
                    read_loop(reader, &id, &sink, &closed);
                    let _ = drained_tx.send(());
                })
        };
        if let Err(e) = reader_thread {
            let _ = killer.kill();
            return Err(SessionError::SpawnFailed(e.to_string()));
        }

        let waiter_thread = {
            let id = id.clone();
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(format!("pty-waiter-{}", short_id(&id)))
                .spawn(move || {
                    let exit_code = wait_for_exit(child.as_mut(), &id);
                    running.store(false, Ordering::SeqCst);

                    if drained_rx.recv_timeout(EXIT_DRAIN_GRACE).is_err() {
                        tracing::debug!(
                            session_id = %id,
                            "Output not drained within grace period"
                        );
                    }
                    // Waits for a delivery the reader may still be parked in.
                    *lock_gate(&closed) = true;

                    let _ = exit_tx.send(exit_code);
                })
        };
        if let Err(e) = waiter_thread {
            let _ = killer.kill();
            return Err(SessionError::SpawnFailed(e.to_string()));
        }

        tracing::debug!(
            session_id = %id,
            pid = pid,
            shell = %options.shell,
            cwd = %options.cwd.display(),
            "Spawned PTY"
        );

        let session = Session {
            id,
            pid,
            cwd: options.cwd,
            terminal: Mutex::new(Terminal {
                master: pair.master,
                cols: options.cols,
                rows: options.rows,
            }),
            input: input_tx,
            killer: Mutex::new(killer),
            running,
        };

        Ok((session, exit_rx))
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the process ID of the shell, or 0 if the platform did not
    /// report one.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns the working directory the shell was started in.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Returns the current terminal size as `(cols, rows)`.
    pub async fn size(&self) -> (u16, u16) {
        let terminal = self.terminal.lock().await;
        (terminal.cols, terminal.rows)
    }

    /// Returns whether the shell process is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queues data for the PTY (stdin).
    ///
    /// Returns as soon as the bytes are queued; they reach the shell in
    /// order, as fast as it reads them.
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        self.input
            .send(data.to_vec())
            .map_err(|_| SessionError::WriteFailed("PTY input closed".to_string()))
    }

    /// Resizes the PTY to the given dimensions.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        let mut terminal = self.terminal.lock().await;
        terminal
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;

        terminal.cols = cols;
        terminal.rows = rows;

        tracing::debug!(
            session_id = %self.id,
            cols = cols,
            rows = rows,
            "Resized PTY"
        );

        Ok(())
    }

    /// Terminates the shell process without waiting for it to exit.
    ///
    /// The exit is reported through the waiter like any other exit.
    pub async fn kill(&self) -> Result<(), SessionError> {
        if !self.is_running() {
            return Ok(());
        }

        let mut killer = self.killer.lock().await;
        killer
            .kill()
            .map_err(|e| SessionError::KillFailed(e.to_string()))
    }
}

fn lock_gate(gate: &StdMutex<bool>) -> MutexGuard<'_, bool> {
    gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_loop(
    mut writer: Box<dyn Write + Send>,
    input: std_mpsc::Receiver<Vec<u8>>,
    id: &SessionId,
) {
    while let Ok(data) = input.recv() {
        if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
            // The shell is gone; remaining input has nowhere to go.
            tracing::debug!(session_id = %id, error = %e, "PTY write failed");
            break;
        }
    }
}

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    id: &SessionId,
    sink: &EventSink,
    closed: &StdMutex<bool>,
) {
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => {
                tracing::debug!(session_id = %id, "PTY EOF");
                break;
            }
            Ok(n) => {
                let closed = lock_gate(closed);
                if *closed {
                    break;
                }
                // A closed sink still has to be drained so the shell never
                // blocks on a full PTY buffer.
                sink.deliver_blocking(SessionEvent::Data {
                    id: id.clone(),
                    data: buffer[..n].to_vec(),
                });
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                // Linux reports EIO on the master once the slave side is gone.
                tracing::debug!(session_id = %id, error = %e, "PTY read ended");
                break;
            }
        }
    }
}

fn wait_for_exit(child: &mut (dyn Child + Send + Sync), id: &SessionId) -> i32 {
    match child.wait() {
        Ok(status) => {
            let code = status.exit_code() as i32;
            tracing::info!(session_id = %id, exit_code = code, "Process exited");
            code
        }
        Err(e) => {
            tracing::warn!(session_id = %id, error = %e, "Failed to collect exit status");
            UNKNOWN_EXIT_CODE
        }
    }
}

fn short_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    &id[..end]
}
