use std::sync::Arc;

use pipenet::{Connection, ConnectionListener, ConnectionUpgrade, DuplexPipe, PipeError};
use tracing::{debug, trace};

use crate::error::DriverError;
use crate::server::{serve, ServerReport};

/// Copy input to output until end-of-data, then release the connection
///
/// Returns the number of bytes echoed.
///
/// # Errors
/// The peer aborted its side of the connection
pub async fn echo(mut connection: Connection) -> Result<u64, DriverError> {
    let id = connection.id();
    let copied = copy_back(connection.pipe_mut()).await;
    connection.dispose().await;
    let echoed = copied?;
    debug!(connection = %id, echoed, "echo finished");
    Ok(echoed)
}

async fn copy_back(pipe: &mut DuplexPipe) -> Result<u64, PipeError> {
    loop {
        let result = pipe.input.read().await?;
        let len = result.buffer.len();
        // The buffer is ours: release the peer before waiting on our own output
        pipe.input.advance(len)?;
        if len > 0 {
            let flushed = pipe.output.write_all(&result.buffer).await?;
            if flushed.is_completed {
                trace!("peer stopped reading");
                break;
            }
        }
        if result.is_completed {
            break;
        }
    }
    pipe.output.complete();
    Ok(pipe.input.position())
}

/// Echo every connection accepted by `listener` until it is stopped
pub async fn run_echo_server<L, U>(listener: &L, upgrade: Arc<U>) -> ServerReport
where
    L: ConnectionListener,
    U: ConnectionUpgrade,
{
    serve(listener, upgrade, echo).await
}
