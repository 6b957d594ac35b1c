/*!
 * File Streams
 * Chunked readers and writers driven through the graceful open/close
 *
 * Each stream owns a tokio task that opens its file, pumps chunks and
 * reports progress as `StreamEvent`s. A stream that is exhausted on open
 * simply waits on the retry queue. Tasks are never aborted, so a descriptor
 * that was opened is always closed and hands its slot back to the queue.
 * Chunk reads and writes run on tokio's blocking pool.
 */

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::graceful::GracefulFs;
use crate::core::limits::{DEFAULT_HIGH_WATER_MARK, DEFAULT_STREAM_FILE_MODE};
use crate::core::types::Fd;
use crate::vfs::types::{flags_or_string, OpenFlags, OpenMode, VfsError, VfsResult};

/// Progress notifications, in emission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Descriptor acquired
    Open(Fd),
    /// Chunk read from the file
    Data(Bytes),
    /// Read stream reached end of file
    End,
    /// Write stream flushed every chunk
    Finish,
    /// Descriptor released
    Close,
    /// Stream failed; no further events follow
    Error(VfsError),
}

/// Lifecycle of a stream's descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Waiting for `open`, possibly parked on the retry queue
    Opening,
    Open,
    /// All data transferred, descriptor still held
    Ended,
    Closed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadStreamOptions {
    #[serde(with = "flags_or_string")]
    pub flags: OpenFlags,
    pub mode: u32,
    pub auto_close: bool,
    /// Largest chunk handed out per `Data` event
    pub high_water_mark: usize,
}

impl Default for ReadStreamOptions {
    fn default() -> Self {
        Self {
            flags: OpenFlags::read_only(),
            mode: DEFAULT_STREAM_FILE_MODE,
            auto_close: true,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WriteStreamOptions {
    #[serde(with = "flags_or_string")]
    pub flags: OpenFlags,
    pub mode: u32,
    pub auto_close: bool,
}

impl Default for WriteStreamOptions {
    fn default() -> Self {
        Self {
            flags: OpenFlags::write_truncate(),
            mode: DEFAULT_STREAM_FILE_MODE,
            auto_close: true,
        }
    }
}

type SharedState = Arc<Mutex<StreamState>>;

/// Emits events and keeps the observable state in step
struct Reporter {
    state: SharedState,
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl Reporter {
    fn emit(&self, state: Option<StreamState>, event: StreamEvent) {
        if let Some(state) = state {
            *self.state.lock() = state;
        }
        // Nobody listening is fine; the task still runs to completion
        let _ = self.events.send(event);
    }

    fn fail(&self, err: VfsError) {
        self.emit(Some(StreamState::Failed), StreamEvent::Error(err));
    }

    /// Close through the graceful path so the release drains the queue
    async fn close(&self, fs: &GracefulFs, fd: Fd) {
        match fs.close(fd).await {
            Ok(()) => self.emit(Some(StreamState::Closed), StreamEvent::Close),
            Err(err) => self.fail(err),
        }
    }
}

/// Readable file stream
///
/// Emits `Open`, then one `Data` per chunk, then `End`, then `Close` when
/// `auto_close` is set.
#[derive(Debug)]
pub struct ReadStream {
    path: PathBuf,
    state: SharedState,
    events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl ReadStream {
    pub(crate) fn spawn(fs: GracefulFs, path: PathBuf, options: ReadStreamOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(StreamState::Opening));
        let reporter = Reporter {
            state: Arc::clone(&state),
            events: tx,
        };

        tokio::spawn(pump_read(fs, path.clone(), options, reporter));

        Self {
            path,
            state,
            events: rx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    /// Next event, `None` once the stream task has finished
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Gather every chunk until `End`
    pub async fn collect(mut self) -> VfsResult<Vec<u8>> {
        let mut contents = Vec::new();
        while let Some(event) = self.next_event().await {
            match event {
                StreamEvent::Data(chunk) => contents.extend_from_slice(&chunk),
                StreamEvent::End => break,
                StreamEvent::Error(err) => return Err(err),
                _ => {}
            }
        }
        Ok(contents)
    }
}

async fn pump_read(fs: GracefulFs, path: PathBuf, options: ReadStreamOptions, reporter: Reporter) {
    let mode = OpenMode::new(options.mode);
    let fd = match fs.open(&path, options.flags, mode).await {
        Ok(fd) => fd,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "read stream failed to open");
            reporter.fail(err);
            return;
        }
    };
    reporter.emit(Some(StreamState::Open), StreamEvent::Open(fd));

    let chunk_size = options.high_water_mark.max(1);
    loop {
        let reader = fs.clone();
        let chunk = on_blocking_pool(move || {
            let mut buf = vec![0u8; chunk_size];
            let n = reader.read(fd, &mut buf)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await;

        match chunk {
            Ok(buf) if buf.is_empty() => break,
            Ok(buf) => reporter.emit(None, StreamEvent::Data(Bytes::from(buf))),
            Err(err) => {
                warn!(path = %path.display(), fd, error = %err, "read stream failed");
                if options.auto_close {
                    if let Err(close_err) = fs.close(fd).await {
                        warn!(fd, error = %close_err, "close after read failure failed");
                    }
                }
                reporter.fail(err);
                return;
            }
        }
    }

    reporter.emit(Some(StreamState::Ended), StreamEvent::End);
    if options.auto_close {
        reporter.close(&fs, fd).await;
    }
}

enum WriteCommand {
    Chunk(Bytes),
    End,
}

/// Writable file stream
///
/// Chunks written before the descriptor is available are buffered in order.
/// Emits `Open`, then `Finish` once `end` has been called and every chunk
/// is written, then `Close` when `auto_close` is set. Dropping the handle
/// ends the stream.
#[derive(Debug)]
pub struct WriteStream {
    path: PathBuf,
    state: SharedState,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    commands: Option<mpsc::UnboundedSender<WriteCommand>>,
}

impl std::fmt::Debug for WriteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteCommand::Chunk(data) => write!(f, "Chunk({} bytes)", data.len()),
            WriteCommand::End => f.write_str("End"),
        }
    }
}

impl WriteStream {
    pub(crate) fn spawn(fs: GracefulFs, path: PathBuf, options: WriteStreamOptions) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(StreamState::Opening));
        let reporter = Reporter {
            state: Arc::clone(&state),
            events: event_tx,
        };

        tokio::spawn(pump_write(fs, path.clone(), options, command_rx, reporter));

        Self {
            path,
            state,
            events: event_rx,
            commands: Some(command_tx),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    /// Queue a chunk for writing
    pub fn write(&mut self, chunk: impl Into<Bytes>) -> VfsResult<()> {
        let commands = self.commands.as_ref().ok_or_else(|| {
            VfsError::InvalidArgument(format!("write after end: {}", self.path.display()))
        })?;
        commands
            .send(WriteCommand::Chunk(chunk.into()))
            .map_err(|_| {
                VfsError::IoError(format!(
                    "write stream for {} has already failed",
                    self.path.display()
                ))
            })
    }

    /// Signal that no more chunks follow
    pub fn end(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(WriteCommand::End);
        }
    }

    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// End the stream and wait until every chunk is written
    pub async fn finished(mut self) -> VfsResult<()> {
        self.end();
        while let Some(event) = self.next_event().await {
            match event {
                StreamEvent::Finish => return Ok(()),
                StreamEvent::Error(err) => return Err(err),
                _ => {}
            }
        }
        Err(VfsError::Abandoned(format!(
            "write stream for {} stopped without finishing",
            self.path.display()
        )))
    }
}

async fn pump_write(
    fs: GracefulFs,
    path: PathBuf,
    options: WriteStreamOptions,
    mut commands: mpsc::UnboundedReceiver<WriteCommand>,
    reporter: Reporter,
) {
    let mode = OpenMode::new(options.mode);
    let fd = match fs.open(&path, options.flags, mode).await {
        Ok(fd) => fd,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "write stream failed to open");
            // Buffered chunks are discarded
            drop(commands);
            reporter.fail(err);
            return;
        }
    };
    reporter.emit(Some(StreamState::Open), StreamEvent::Open(fd));

    // A dropped handle ends the stream like an explicit end
    while let Some(WriteCommand::Chunk(data)) = commands.recv().await {
        let writer = fs.clone();
        if let Err(err) = on_blocking_pool(move || write_all(&writer, fd, &data)).await {
            warn!(path = %path.display(), fd, error = %err, "write stream failed");
            drop(commands);
            if options.auto_close {
                if let Err(close_err) = fs.close(fd).await {
                    warn!(fd, error = %close_err, "close after write failure failed");
                }
            }
            reporter.fail(err);
            return;
        }
    }
    drop(commands);

    reporter.emit(Some(StreamState::Ended), StreamEvent::Finish);
    if options.auto_close {
        reporter.close(&fs, fd).await;
    }
}

/// Run a backend call off the async workers
async fn on_blocking_pool<T, F>(call: F) -> VfsResult<T>
where
    F: FnOnce() -> VfsResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .unwrap_or_else(|err| Err(VfsError::IoError(format!("blocking file call failed: {}", err))))
}

fn write_all(fs: &GracefulFs, fd: Fd, mut data: &[u8]) -> VfsResult<()> {
    while !data.is_empty() {
        match fs.write(fd, data)? {
            0 => return Err(VfsError::IoError(format!("write to fd {} made no progress", fd))),
            n => data = &data[n..],
        }
    }
    Ok(())
}

/// Legacy name for [`ReadStream`]
pub type FileReadStream = ReadStream;

/// Legacy name for [`WriteStream`]
pub type FileWriteStream = WriteStream;
