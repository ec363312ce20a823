//! Copy loops between a byte stream and a duplex pipe
//!
//! Two tasks per stream:
//! - stream → `pipe.output`, until the stream ends or the pipe's reader completes
//! - `pipe.input` → stream, until the pipe's writer completes or the stream fails

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::duplex::DuplexPipe;
use crate::error::PipeError;
use crate::pipe::{PipeReader, PipeWriter};

const PUMP_CHUNK_SIZE: usize = 16 * 1024;

/// Handles of the two copy tasks
#[derive(Debug)]
pub struct PumpTasks {
    tasks: Vec<JoinHandle<()>>,
}

impl PumpTasks {
    /// Wait until both copy loops have finished
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "pump task failed");
            }
        }
    }

    /// Take over the tasks of `other`
    pub(crate) fn absorb(&mut self, other: PumpTasks) {
        self.tasks.extend(other.tasks);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }
}

/// Spawn the copy loops connecting `stream` with `pipe`
pub fn spawn_pumps<S>(stream: S, pipe: DuplexPipe, hint: &str) -> PumpTasks
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (input, output) = pipe.into_split();
    let inbound = tokio::spawn(stream_to_pipe(read_half, output, hint.to_string()));
    let outbound = tokio::spawn(pipe_to_stream(input, write_half, hint.to_string()));
    PumpTasks {
        tasks: vec![inbound, outbound],
    }
}

async fn stream_to_pipe<R>(mut reader: R, mut output: PipeWriter, hint: String)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; PUMP_CHUNK_SIZE];
    loop {
        let read = tokio::select! {
            read = reader.read(&mut buf) => read,
            () = output.reader_closed() => {
                trace!(%hint, "pipe reader closed, stop reading stream");
                break;
            }
        };
        let n = match read {
            Ok(0) => {
                trace!(%hint, "stream ended");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                debug!(%hint, error = %e, "stream read failed");
                output.complete_with_error(PipeError::aborted(e.to_string()));
                return;
            }
        };
        let chunk = &buf[..n];
        match output.write_all(chunk).await {
            Ok(result) if result.is_completed => break,
            Ok(_) => {}
            Err(e) => {
                debug!(%hint, error = %e, "pipe write failed");
                return;
            }
        }
    }
    output.complete();
}

async fn pipe_to_stream<W>(mut input: PipeReader, mut writer: W, hint: String)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let result = match input.read().await {
            Ok(result) => result,
            Err(e) => {
                debug!(%hint, error = %e, "pipe read failed");
                break;
            }
        };
        if !result.buffer.is_empty() {
            let written = async {
                writer.write_all(&result.buffer).await?;
                writer.flush().await
            };
            if let Err(e) = written.await {
                debug!(%hint, error = %e, "stream write failed");
                input.complete();
                return;
            }
        }
        if let Err(e) = input.advance(result.buffer.len()) {
            debug!(%hint, error = %e, "pipe advance failed");
            break;
        }
        if result.is_completed {
            trace!(%hint, "pipe completed");
            break;
        }
    }
    if let Err(e) = writer.shutdown().await {
        trace!(%hint, error = %e, "stream shutdown failed");
    }
    input.complete();
}
