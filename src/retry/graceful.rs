/*!
 * Graceful Filesystem
 * Wraps a backend so descriptor exhaustion defers instead of failing
 */

use std::path::Path;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::queue::{Call, Invocation, RetryQueue};
use super::stream::{ReadStream, ReadStreamOptions, WriteStream, WriteStreamOptions};
use crate::core::types::Fd;
use crate::vfs::types::{Entry, Metadata, OpenFlags, OpenMode, VfsError, VfsResult};
use crate::vfs::FileSystem;

/// Backend wrapper that parks exhausted calls on a retry queue
///
/// `open`, `read_file` and `read_dir` never report EMFILE/ENFILE; they are
/// replayed once a descriptor comes back through `close`. Every other error
/// reaches the caller unchanged. Clones share the backend and the queue.
///
/// The async adapters call the backend on the task that polls them, so a
/// blocking backend such as `LocalFS` occupies that worker for the length of
/// one call. Streams run their chunk I/O on tokio's blocking pool instead.
#[derive(Clone)]
pub struct GracefulFs {
    inner: Arc<dyn FileSystem>,
    queue: Arc<RetryQueue>,
}

impl GracefulFs {
    /// Wrap a backend using the process-wide retry queue
    pub fn new<F: FileSystem + 'static>(inner: F) -> Self {
        Self::from_arc(Arc::new(inner))
    }

    /// Wrap an already shared backend using the process-wide retry queue
    pub fn from_arc(inner: Arc<dyn FileSystem>) -> Self {
        Self {
            inner,
            queue: RetryQueue::global(),
        }
    }

    /// Wrap a backend with a dedicated queue
    pub fn with_queue<F: FileSystem + 'static>(inner: F, queue: Arc<RetryQueue>) -> Self {
        Self {
            inner: Arc::new(inner),
            queue,
        }
    }

    pub fn inner(&self) -> &Arc<dyn FileSystem> {
        &self.inner
    }

    pub fn queue(&self) -> &Arc<RetryQueue> {
        &self.queue
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    // Callback style

    /// Open a file, deferring on exhaustion
    ///
    /// `done` runs exactly once with the first outcome that is not
    /// descriptor exhaustion. It may run before this returns.
    pub fn open_with<F>(&self, path: impl AsRef<Path>, flags: OpenFlags, mode: OpenMode, done: F)
    where
        F: FnOnce(VfsResult<Fd>) + Send + 'static,
    {
        let call = Call::Open {
            path: path.as_ref().to_path_buf(),
            flags,
            mode,
            done: Box::new(done),
        };
        self.queue.submit(Invocation::new(Arc::clone(&self.inner), call));
    }

    /// Read an entire file, deferring on exhaustion
    pub fn read_file_with<F>(&self, path: impl AsRef<Path>, done: F)
    where
        F: FnOnce(VfsResult<Vec<u8>>) + Send + 'static,
    {
        let call = Call::ReadFile {
            path: path.as_ref().to_path_buf(),
            done: Box::new(done),
        };
        self.queue.submit(Invocation::new(Arc::clone(&self.inner), call));
    }

    /// List a directory sorted by name, deferring on exhaustion
    pub fn read_dir_with<F>(&self, path: impl AsRef<Path>, done: F)
    where
        F: FnOnce(VfsResult<Vec<Entry>>) + Send + 'static,
    {
        let call = Call::ReadDir {
            path: path.as_ref().to_path_buf(),
            done: Box::new(done),
        };
        self.queue.submit(Invocation::new(Arc::clone(&self.inner), call));
    }

    /// Release a descriptor, then hand its outcome to `done`
    ///
    /// A successful close replays one parked call before `done` runs. When
    /// this is itself called from a replayed call's continuation, the replay
    /// it triggers is deferred to the drain loop already running on this
    /// thread and happens after `done` returns.
    pub fn close_with<F>(&self, fd: Fd, done: F)
    where
        F: FnOnce(VfsResult<()>),
    {
        done(self.close_sync(fd));
    }

    /// Release a descriptor synchronously
    ///
    /// Only a successful close replays a parked call; a failed close has
    /// released nothing.
    pub fn close_sync(&self, fd: Fd) -> VfsResult<()> {
        let result = self.inner.close(fd);
        match &result {
            Ok(()) => {
                self.queue.retry();
            }
            Err(err) => {
                warn!(fd, error = %err, "close failed, retry queue left untouched");
            }
        }
        result
    }

    // Async adapters

    pub async fn open(
        &self,
        path: impl AsRef<Path>,
        flags: OpenFlags,
        mode: OpenMode,
    ) -> VfsResult<Fd> {
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let queue = Arc::downgrade(&self.queue);
        self.open_with(path, flags, mode, move |result| {
            // Nobody is waiting any more; hand the descriptor straight back
            if let Err(Ok(fd)) = tx.send(result) {
                release_unclaimed(inner.as_ref(), &queue, fd);
            }
        });
        settled(rx, "open").await
    }

    pub async fn read_file(&self, path: impl AsRef<Path>) -> VfsResult<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.read_file_with(path, move |result| {
            let _ = tx.send(result);
        });
        settled(rx, "read_file").await
    }

    /// Read an entire file as UTF-8
    pub async fn read_to_string(&self, path: impl AsRef<Path>) -> VfsResult<String> {
        let path = path.as_ref().to_path_buf();
        let bytes = self.read_file(&path).await?;
        String::from_utf8(bytes).map_err(|_| {
            VfsError::InvalidArgument(format!("{} is not valid UTF-8", path.display()))
        })
    }

    pub async fn read_dir(&self, path: impl AsRef<Path>) -> VfsResult<Vec<Entry>> {
        let (tx, rx) = oneshot::channel();
        self.read_dir_with(path, move |result| {
            let _ = tx.send(result);
        });
        settled(rx, "read_dir").await
    }

    pub async fn close(&self, fd: Fd) -> VfsResult<()> {
        self.close_sync(fd)
    }

    // Streams

    /// Stream a file's contents in chunks
    ///
    /// Must be called from within a tokio runtime.
    pub fn create_read_stream(
        &self,
        path: impl AsRef<Path>,
        options: ReadStreamOptions,
    ) -> ReadStream {
        ReadStream::spawn(self.clone(), path.as_ref().to_path_buf(), options)
    }

    /// Stream chunks into a file
    ///
    /// Must be called from within a tokio runtime.
    pub fn create_write_stream(
        &self,
        path: impl AsRef<Path>,
        options: WriteStreamOptions,
    ) -> WriteStream {
        WriteStream::spawn(self.clone(), path.as_ref().to_path_buf(), options)
    }

    // Pass-through

    pub fn read(&self, fd: Fd, buf: &mut [u8]) -> VfsResult<usize> {
        self.inner.read(fd, buf)
    }

    pub fn write(&self, fd: Fd, data: &[u8]) -> VfsResult<usize> {
        self.inner.write(fd, data)
    }

    pub fn write_file(&self, path: impl AsRef<Path>, data: &[u8]) -> VfsResult<()> {
        self.inner.write_file(path.as_ref(), data)
    }

    pub fn metadata(&self, path: impl AsRef<Path>) -> VfsResult<Metadata> {
        self.inner.metadata(path.as_ref())
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.inner.exists(path.as_ref())
    }

    pub fn create_dir(&self, path: impl AsRef<Path>) -> VfsResult<()> {
        self.inner.create_dir(path.as_ref())
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) -> VfsResult<()> {
        self.inner.remove_file(path.as_ref())
    }

    pub fn remove_dir_all(&self, path: impl AsRef<Path>) -> VfsResult<()> {
        self.inner.remove_dir_all(path.as_ref())
    }

    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> VfsResult<()> {
        self.inner.rename(from.as_ref(), to.as_ref())
    }
}

impl std::fmt::Debug for GracefulFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GracefulFs")
            .field("inner", &self.inner.name())
            .field("pending", &self.queue.len())
            .finish()
    }
}

/// Close a descriptor whose open was cancelled while it was parked
fn release_unclaimed(inner: &dyn FileSystem, queue: &Weak<RetryQueue>, fd: Fd) {
    debug!(fd, "open cancelled before completion, closing its descriptor");
    match inner.close(fd) {
        Ok(()) => {
            if let Some(queue) = queue.upgrade() {
                queue.retry();
            }
        }
        Err(err) => warn!(fd, error = %err, "closing descriptor of cancelled open failed"),
    }
}

/// Await a continuation; a dropped sender means the queue was torn down
async fn settled<T>(rx: oneshot::Receiver<VfsResult<T>>, operation: &str) -> VfsResult<T> {
    rx.await.unwrap_or_else(|_| {
        Err(VfsError::Abandoned(format!(
            "{} dropped before it could be retried",
            operation
        )))
    })
}
