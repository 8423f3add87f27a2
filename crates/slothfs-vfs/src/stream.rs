//! Streaming writes that report completion to the update sink.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use slothfs_storage::Device;
use tokio::fs::File;
use tokio::io::AsyncWrite;
use tracing::debug;

use crate::hooks::UpdateSink;

/// A file being written on one device.
///
/// The update sink is notified once, when the stream is shut down
/// (`AsyncWriteExt::shutdown`). A stream dropped without shutdown is treated
/// as abandoned and never triggers replication.
pub struct WriteStream {
    file: File,
    device: Device,
    relative: PathBuf,
    updates: Arc<dyn UpdateSink>,
    finished: bool,
}

impl WriteStream {
    pub(crate) fn new(
        file: File,
        device: Device,
        relative: PathBuf,
        updates: Arc<dyn UpdateSink>,
    ) -> Self {
        Self {
            file,
            device,
            relative,
            updates,
            finished: false,
        }
    }

    /// The device receiving the data.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Namespace-relative path being written.
    pub fn relative_path(&self) -> &Path {
        &self.relative
    }

    /// Whether shutdown completed and the sink was notified.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl AsyncWrite for WriteStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().file).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(Pin::new(&mut this.file).poll_shutdown(cx))?;
        if !this.finished {
            this.finished = true;
            debug!(
                device = %this.device,
                path = %this.relative.display(),
                "write stream finished"
            );
            this.updates.file_updated(&this.device, &this.relative);
        }
        Poll::Ready(Ok(()))
    }
}

impl std::fmt::Debug for WriteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteStream")
            .field("device", &self.device)
            .field("relative", &self.relative)
            .field("finished", &self.finished)
            .finish()
    }
}
