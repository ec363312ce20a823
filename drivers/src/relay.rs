//! Relay between a connection and local streams (e.g. stdin/stdout)
//!
//! End of local input half-closes the connection: the output completes, the
//! peer's bytes keep flowing. End-of-data from the peer ends the relay at
//! once, even if local input is still open.

use pipenet::{Connection, PipeReader, PipeWriter};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::DriverError;

const CHUNK_SIZE: usize = 4096;

/// Bytes moved by a relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Local input to the connection
    pub sent: u64,
    /// Connection to local output
    pub received: u64,
}

/// Forward `local_in` to the connection and the connection to `local_out`
///
/// # Errors
/// A local stream failed or the peer aborted the connection
pub async fn relay<R, W>(
    mut connection: Connection,
    local_in: R,
    local_out: W,
) -> Result<RelayStats, DriverError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let id = connection.id();
    let outcome = {
        let pipe = connection.pipe_mut();
        run(&mut pipe.input, &mut pipe.output, local_in, local_out).await
    };
    let stats = RelayStats {
        sent: connection.output().tell(),
        received: connection.input().position(),
    };
    connection.dispose().await;
    outcome?;
    debug!(connection = %id, sent = stats.sent, received = stats.received, "relay finished");
    Ok(stats)
}

async fn run<R, W>(
    input: &mut PipeReader,
    output: &mut PipeWriter,
    local_in: R,
    local_out: W,
) -> Result<(), DriverError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let upload = upload(output, local_in);
    let download = download(input, local_out);
    tokio::pin!(upload, download);

    let mut uploading = true;
    loop {
        tokio::select! {
            sent = &mut upload, if uploading => {
                sent?;
                uploading = false;
                trace!("local input ended, output completed");
            }
            received = &mut download => return received,
        }
    }
}

async fn upload<R>(output: &mut PipeWriter, mut local_in: R) -> Result<(), DriverError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = local_in.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let flushed = output.write_all(&buf[..n]).await?;
        if flushed.is_completed {
            break;
        }
    }
    output.complete();
    Ok(())
}

async fn download<W>(input: &mut PipeReader, mut local_out: W) -> Result<(), DriverError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let result = input.read().await?;
        if !result.buffer.is_empty() {
            local_out.write_all(&result.buffer).await?;
            local_out.flush().await?;
        }
        input.advance(result.buffer.len())?;
        if result.is_completed {
            return Ok(());
        }
    }
}
