//! Single-producer, single-consumer byte pipe with backpressure
//!
//! - The Writer appends to an unflushed region; `flush` commits it and makes
//!   it visible to the Reader
//! - The Reader gets every committed, not-yet-consumed byte and tells the pipe
//!   how much it consumed (`advance`), which reclaims memory and releases a
//!   writer suspended by backpressure
//! - Coordination via notification queue: the reader waits on the reader
//!   handle, the writer waits on the writer handle
//!
//! # Locking
//!
//! Waiters take the queue lock first and the state lock second, then register
//! the wait while still holding the queue lock (see `crate::notification_queue`).
//! Notifiers update the state, release the state lock, and only then notify.
//! Guards never live across an `.await`: the decision "ready or wait" is made
//! in a plain function that returns the wait future.

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::{ConfigError, PipeError};
use crate::idgen::{Handle, IdGen, IntCanBeHandle};
use crate::notification_queue::NotificationQueueArc;

/// Buffering limits of a pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipeOptions {
    /// `flush` suspends when this many bytes are unconsumed
    pub pause_writer_threshold: usize,
    /// ... and resumes when the unconsumed bytes drop below this
    pub resume_writer_threshold: usize,
    /// Upper bound on unconsumed plus unflushed bytes; `write` fails beyond it
    pub max_buffer_size: usize,
}

impl PipeOptions {
    pub const DEFAULT_PAUSE_WRITER_THRESHOLD: usize = 64 * 1024;
    pub const DEFAULT_RESUME_WRITER_THRESHOLD: usize = 32 * 1024;
    pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

    /// Check `0 < resume <= pause <= max`
    ///
    /// # Errors
    /// `ConfigError::Invalid` describing the first violated bound
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resume_writer_threshold == 0 {
            return Err(ConfigError::Invalid(
                "resume_writer_threshold must be positive".to_string(),
            ));
        }
        if self.resume_writer_threshold > self.pause_writer_threshold {
            return Err(ConfigError::Invalid(format!(
                "resume_writer_threshold ({}) exceeds pause_writer_threshold ({})",
                self.resume_writer_threshold, self.pause_writer_threshold
            )));
        }
        if self.pause_writer_threshold > self.max_buffer_size {
            return Err(ConfigError::Invalid(format!(
                "pause_writer_threshold ({}) exceeds max_buffer_size ({})",
                self.pause_writer_threshold, self.max_buffer_size
            )));
        }
        Ok(())
    }
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            pause_writer_threshold: Self::DEFAULT_PAUSE_WRITER_THRESHOLD,
            resume_writer_threshold: Self::DEFAULT_RESUME_WRITER_THRESHOLD,
            max_buffer_size: Self::DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

/// Outcome of a successful `PipeReader::read`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    /// Every committed byte the reader has not consumed yet
    pub buffer: Bytes,
    /// The writer completed; no bytes beyond `buffer` will arrive
    pub is_completed: bool,
    /// The read was interrupted by a `ReadCanceller`
    pub is_canceled: bool,
}

/// Outcome of a successful `PipeWriter::flush`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushResult {
    /// The reader completed; further data is discarded
    pub is_completed: bool,
}

/// Shared state between Writer and Reader
struct PipeState {
    options: PipeOptions,
    /// Committed, not yet consumed; reads hand out clones of it
    readable: Bytes,
    /// Written, not yet flushed
    pending: BytesMut,
    /// Prefix of `readable` the reader has already looked at
    examined: usize,
    written: u64,
    consumed: u64,
    writer_completed: bool,
    writer_error: Option<PipeError>,
    reader_completed: bool,
    cancel_pending: bool,
}

impl PipeState {
    fn new(options: PipeOptions) -> Self {
        Self {
            options,
            readable: Bytes::new(),
            pending: BytesMut::new(),
            examined: 0,
            written: 0,
            consumed: 0,
            writer_completed: false,
            writer_error: None,
            reader_completed: false,
            cancel_pending: false,
        }
    }

    fn buffered(&self) -> usize {
        self.readable.len() + self.pending.len()
    }

    /// Move the unflushed region into the readable one; returns bytes committed
    fn commit(&mut self) -> usize {
        let n = self.pending.len();
        if self.reader_completed {
            self.pending.clear();
        } else if n > 0 {
            let pending = self.pending.split().freeze();
            self.readable = if self.readable.is_empty() {
                pending
            } else {
                let mut joined = BytesMut::with_capacity(self.readable.len() + n);
                joined.extend_from_slice(&self.readable);
                joined.extend_from_slice(&pending);
                joined.freeze()
            };
        }
        n
    }

    /// Decide what `read` returns right now, `None` means "wait"
    fn poll_read(&mut self) -> Option<Result<ReadResult, PipeError>> {
        if self.reader_completed {
            return Some(Err(PipeError::ReaderCompleted));
        }
        if self.cancel_pending {
            self.cancel_pending = false;
            return Some(Ok(ReadResult {
                buffer: self.readable.clone(),
                is_completed: false,
                is_canceled: true,
            }));
        }
        if self.readable.len() > self.examined {
            return Some(Ok(ReadResult {
                buffer: self.readable.clone(),
                is_completed: self.writer_completed && self.writer_error.is_none(),
                is_canceled: false,
            }));
        }
        if let Some(err) = self.writer_error.take() {
            return Some(Err(err));
        }
        if self.writer_completed {
            return Some(Ok(ReadResult {
                buffer: self.readable.clone(),
                is_completed: true,
                is_canceled: false,
            }));
        }
        None
    }
}

/// Result of a lock-protected check: either done, or a future to await
enum Step<T, F> {
    Ready(T),
    Wait(F),
}

/// Pipe factory
pub struct Pipe;

impl Pipe {
    /// Create a pipe with its own notification queue
    #[must_use]
    #[allow(clippy::new_ret_no_self)]
    pub fn new(options: PipeOptions) -> (PipeReader, PipeWriter) {
        Self::with_queue(options, &NotificationQueueArc::new(), &IdGen::new(), "pipe")
    }

    /// Create a pipe whose handles live in a shared notification queue
    #[must_use]
    pub fn with_queue(
        options: PipeOptions,
        queue: &NotificationQueueArc,
        ids: &IdGen,
        debug_hint: &str,
    ) -> (PipeReader, PipeWriter) {
        let reader_handle = ids.next_handle();
        let writer_handle = ids.next_handle();
        queue.whitelist(reader_handle, &format!("pipe.reader {debug_hint}"));
        queue.whitelist(writer_handle, &format!("pipe.writer {debug_hint}"));

        let state = Arc::new(Mutex::new(PipeState::new(options)));
        let reader = PipeReader {
            state: Arc::clone(&state),
            queue: queue.clone(),
            reader_handle,
            writer_handle,
            debug_hint: debug_hint.to_string(),
        };
        let writer = PipeWriter {
            state,
            queue: queue.clone(),
            reader_handle,
            writer_handle,
            debug_hint: debug_hint.to_string(),
        };
        (reader, writer)
    }
}

/// Writer side of the pipe
///
/// # Thread Safety
///
/// Writer and Reader may live on different threads. All mutating methods
/// take `&mut self`, so one Writer is used by one task at a time.
pub struct PipeWriter {
    state: Arc<Mutex<PipeState>>,
    queue: NotificationQueueArc,
    reader_handle: Handle,
    writer_handle: Handle,
    debug_hint: String,
}

impl PipeWriter {
    /// Append bytes to the unflushed region without suspending
    ///
    /// # Errors
    /// - `WriterCompleted` after `complete`
    /// - `BufferFull` if the data does not fit into `max_buffer_size`
    pub fn write(&mut self, data: &[u8]) -> Result<usize, PipeError> {
        let mut state = self.state.lock();
        if state.writer_completed {
            return Err(PipeError::WriterCompleted);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let max = state.options.max_buffer_size;
        let available = max.saturating_sub(state.buffered());
        if data.len() > available {
            return Err(PipeError::BufferFull {
                requested: data.len(),
                available,
                max,
            });
        }
        state.pending.extend_from_slice(data);
        state.written += data.len() as u64;
        Ok(data.len())
    }

    /// Bytes that `write` would accept right now
    #[must_use]
    pub fn capacity(&self) -> usize {
        let state = self.state.lock();
        state.options.max_buffer_size.saturating_sub(state.buffered())
    }

    /// Commit written bytes and wait while the reader is behind
    ///
    /// # Errors
    /// `WriterCompleted` after `complete`
    pub async fn flush(&mut self) -> Result<FlushResult, PipeError> {
        let committed = {
            let mut state = self.state.lock();
            if state.writer_completed {
                return Err(PipeError::WriterCompleted);
            }
            let paused = state.readable.len() + state.pending.len()
                >= state.options.pause_writer_threshold;
            (state.commit(), paused)
        };
        let (n, paused) = committed;
        if n > 0 {
            #[allow(clippy::cast_possible_wrap)]
            self.queue.notify(self.reader_handle, n as IntCanBeHandle);
        }
        if !paused {
            return Ok(FlushResult {
                is_completed: self.state.lock().reader_completed,
            });
        }

        log::trace!("pipe.flush: writer paused ({})", self.debug_hint);
        loop {
            match self.check_backpressure() {
                Step::Ready(result) => return Ok(result),
                Step::Wait(wait) => {
                    wait.await;
                }
            }
        }
    }

    fn check_backpressure(&self) -> Step<FlushResult, impl Future<Output = IntCanBeHandle> + Send> {
        let queue_lock = self.queue.get_lock();
        let state = self.state.lock();
        if state.reader_completed {
            return Step::Ready(FlushResult { is_completed: true });
        }
        if state.readable.len() < state.options.resume_writer_threshold {
            return Step::Ready(FlushResult {
                is_completed: false,
            });
        }
        drop(state);
        Step::Wait(
            self.queue
                .wait_async(self.writer_handle, "pipe.flush", queue_lock),
        )
    }

    /// Resolves once the reader completes
    pub async fn reader_closed(&self) {
        loop {
            match self.check_reader_closed() {
                Step::Ready(()) => return,
                Step::Wait(wait) => {
                    wait.await;
                }
            }
        }
    }

    fn check_reader_closed(&self) -> Step<(), impl Future<Output = IntCanBeHandle> + Send> {
        let queue_lock = self.queue.get_lock();
        if self.state.lock().reader_completed {
            return Step::Ready(());
        }
        Step::Wait(
            self.queue
                .wait_async(self.writer_handle, "pipe.reader_closed", queue_lock),
        )
    }

    /// Write everything, flushing in pieces that fit the buffer
    ///
    /// Stops early, without error, if the reader completes.
    ///
    /// # Errors
    /// `WriterCompleted` after `complete`
    pub async fn write_all(&mut self, mut data: &[u8]) -> Result<FlushResult, PipeError> {
        loop {
            let n = data.len().min(self.capacity());
            let (chunk, rest) = data.split_at(n);
            self.write(chunk)?;
            data = rest;
            let result = self.flush().await?;
            if result.is_completed || data.is_empty() {
                return Ok(result);
            }
        }
    }

    /// Signal that no more data will be written
    ///
    /// Unflushed bytes are committed. Completing twice is a no-op.
    pub fn complete(&mut self) {
        self.complete_inner(None);
    }

    /// Complete and hand `err` to the reader after the buffered bytes
    pub fn complete_with_error(&mut self, err: PipeError) {
        self.complete_inner(Some(err));
    }

    fn complete_inner(&mut self, err: Option<PipeError>) {
        {
            let mut state = self.state.lock();
            if state.writer_completed {
                log::debug!("PipeWriter::complete() on completed writer: {}", self.debug_hint);
                return;
            }
            state.commit();
            state.writer_completed = true;
            state.writer_error = err;
        }
        // The reader handle won't be notified anymore
        self.queue.unlist(self.reader_handle);
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state.lock().writer_completed
    }

    /// Whether the reader completed, so that written data goes nowhere
    #[must_use]
    pub fn is_reader_completed(&self) -> bool {
        self.state.lock().reader_completed
    }

    /// Total bytes written, flushed or not
    #[must_use]
    pub fn tell(&self) -> u64 {
        self.state.lock().written
    }
}

impl fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(
            f,
            "PipeWriter(handle={:?}, completed={}, tell={}, pending={}, hint={})",
            self.writer_handle,
            state.writer_completed,
            state.written,
            state.pending.len(),
            self.debug_hint
        )
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if !self.is_completed() {
            self.complete();
        }
    }
}

/// Reader side of the pipe
///
/// `read` takes `&mut self`: one Reader is used by one task at a time.
/// Use a [`ReadCanceller`] to interrupt a pending read from elsewhere.
pub struct PipeReader {
    state: Arc<Mutex<PipeState>>,
    queue: NotificationQueueArc,
    reader_handle: Handle,
    writer_handle: Handle,
    debug_hint: String,
}

impl PipeReader {
    /// Wait for committed data, writer completion or cancellation
    ///
    /// Returns all unconsumed bytes. Call `advance` before the next read;
    /// otherwise the same bytes are returned again.
    ///
    /// # Errors
    /// - `ReaderCompleted` after `complete`
    /// - the writer's error, exactly once, after all buffered bytes
    pub async fn read(&mut self) -> Result<ReadResult, PipeError> {
        loop {
            match self.check_readable() {
                Step::Ready(result) => return result,
                Step::Wait(wait) => {
                    wait.await;
                }
            }
        }
    }

    /// `read` without suspending; `Ok(None)` if it would wait
    ///
    /// # Errors
    /// Same as `read`
    pub fn try_read(&mut self) -> Result<Option<ReadResult>, PipeError> {
        self.state.lock().poll_read().transpose()
    }

    fn check_readable(
        &self,
    ) -> Step<Result<ReadResult, PipeError>, impl Future<Output = IntCanBeHandle> + Send> {
        let queue_lock = self.queue.get_lock();
        let mut state = self.state.lock();
        if let Some(result) = state.poll_read() {
            return Step::Ready(result);
        }
        drop(state);
        Step::Wait(
            self.queue
                .wait_async(self.reader_handle, "pipe.read", queue_lock),
        )
    }

    /// Release the first `consumed` bytes and mark the rest as examined
    ///
    /// # Errors
    /// `InvalidAdvance` if fewer than `consumed` bytes are buffered
    pub fn advance(&mut self, consumed: usize) -> Result<(), PipeError> {
        let examined = self.state.lock().readable.len();
        self.advance_to(consumed, examined.max(consumed))
    }

    /// Release the first `consumed` bytes; the next `read` waits for data
    /// beyond the first `examined` bytes
    ///
    /// # Errors
    /// `InvalidAdvance` if `consumed > examined` or more than buffered
    pub fn advance_to(&mut self, consumed: usize, examined: usize) -> Result<(), PipeError> {
        {
            let mut state = self.state.lock();
            let buffered = state.readable.len();
            if consumed > buffered || examined > buffered || consumed > examined {
                return Err(PipeError::InvalidAdvance {
                    requested: consumed.max(examined),
                    buffered,
                });
            }
            state.readable.advance(consumed);
            state.examined = examined - consumed;
            state.consumed += consumed as u64;
        }
        if consumed > 0 {
            #[allow(clippy::cast_possible_wrap)]
            self.queue.notify(self.writer_handle, consumed as IntCanBeHandle);
        }
        Ok(())
    }

    /// Read data from the pipe (POSIX-style)
    ///
    /// Copies up to `buf.len()` bytes and consumes them.
    ///
    /// Returns:
    /// - Positive value: number of bytes read
    /// - 0: end-of-data (or `buf` is empty)
    ///
    /// # Errors
    /// Same as `read`; a canceled read is reported as `Aborted`
    pub async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, PipeError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let result = self.read().await?;
            let n = result.buffer.len().min(buf.len());
            if n > 0 {
                #[allow(clippy::indexing_slicing)]
                buf[..n].copy_from_slice(&result.buffer[..n]);
                self.advance_to(n, n)?;
                return Ok(n);
            }
            if result.is_canceled {
                return Err(PipeError::aborted("read canceled"));
            }
            if result.is_completed {
                return Ok(0);
            }
        }
    }

    /// Token that interrupts the pending (or next) `read`
    #[must_use]
    pub fn canceller(&self) -> ReadCanceller {
        ReadCanceller {
            state: Arc::clone(&self.state),
            queue: self.queue.clone(),
            reader_handle: self.reader_handle,
        }
    }

    /// Stop reading; buffered data is dropped and the writer released
    pub fn complete(&mut self) {
        {
            let mut state = self.state.lock();
            if state.reader_completed {
                log::debug!("PipeReader::complete() on completed reader: {}", self.debug_hint);
                return;
            }
            state.reader_completed = true;
            state.readable.clear();
            state.pending.clear();
            state.examined = 0;
        }
        // The writer handle won't be notified anymore
        self.queue.unlist(self.writer_handle);
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state.lock().reader_completed
    }

    /// Total bytes consumed
    #[must_use]
    pub fn position(&self) -> u64 {
        self.state.lock().consumed
    }
}

impl fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(
            f,
            "PipeReader(handle={:?}, completed={}, position={}, readable={}, hint={})",
            self.reader_handle,
            state.reader_completed,
            state.consumed,
            state.readable.len(),
            self.debug_hint
        )
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        if !self.is_completed() {
            self.complete();
        }
    }
}

/// Interrupts a pending `PipeReader::read`
///
/// The read returns `is_canceled = true` once. If no read is pending, the
/// next one is interrupted.
#[derive(Clone)]
pub struct ReadCanceller {
    state: Arc<Mutex<PipeState>>,
    queue: NotificationQueueArc,
    reader_handle: Handle,
}

impl ReadCanceller {
    pub fn cancel(&self) {
        self.state.lock().cancel_pending = true;
        self.queue.notify(self.reader_handle, 0);
    }
}

impl fmt::Debug for ReadCanceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReadCanceller(handle={:?})", self.reader_handle)
    }
}

// Implement embedded_io_async traits
impl embedded_io_async::ErrorType for PipeReader {
    type Error = PipeError;
}

impl embedded_io_async::Read for PipeReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        PipeReader::read_into(self, buf).await
    }
}

impl embedded_io_async::ErrorType for PipeWriter {
    type Error = PipeError;
}

impl embedded_io_async::Write for PipeWriter {
    /// Writes what fits and flushes it; a gone reader is `ReaderCompleted`
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = buf.len().min(self.capacity());
            if n > 0 {
                #[allow(clippy::indexing_slicing)]
                PipeWriter::write(self, &buf[..n])?;
            }
            let result = PipeWriter::flush(self).await?;
            if result.is_completed {
                return Err(PipeError::ReaderCompleted);
            }
            if n > 0 {
                return Ok(n);
            }
        }
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        let result = PipeWriter::flush(self).await?;
        if result.is_completed {
            return Err(PipeError::ReaderCompleted);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        assert!(PipeOptions::default().validate().is_ok());
    }

    #[test]
    fn test_options_validation() {
        let bad = [
            PipeOptions {
                resume_writer_threshold: 0,
                ..PipeOptions::default()
            },
            PipeOptions {
                pause_writer_threshold: 10,
                resume_writer_threshold: 20,
                max_buffer_size: 100,
            },
            PipeOptions {
                pause_writer_threshold: 200,
                resume_writer_threshold: 20,
                max_buffer_size: 100,
            },
        ];
        for options in bad {
            assert!(options.validate().is_err(), "{options:?}");
        }
    }

    #[test]
    fn test_commit_after_reader_completed_discards() {
        let mut state = PipeState::new(PipeOptions::default());
        state.reader_completed = true;
        state.pending.extend_from_slice(b"lost");
        assert_eq!(state.commit(), 4);
        assert!(state.readable.is_empty());
        assert!(state.pending.is_empty());
    }

    #[test]
    fn test_rereading_shares_the_readable_bytes() {
        let mut state = PipeState::new(PipeOptions::default());
        state.pending.extend_from_slice(b"GET / HT");
        state.commit();
        let first = state.poll_read().unwrap().unwrap();

        // Nothing consumed or examined, as a parser waiting for a full head
        state.examined = 0;
        let again = state.poll_read().unwrap().unwrap();
        assert_eq!(first.buffer.as_ptr(), again.buffer.as_ptr());

        state.pending.extend_from_slice(b"TP/1.1");
        state.commit();
        let joined = state.poll_read().unwrap().unwrap();
        assert_eq!(&joined.buffer[..], b"GET / HTTP/1.1");
        assert_eq!(&first.buffer[..], b"GET / HT");

        state.readable.advance(4);
        let rest = state.poll_read().unwrap().unwrap();
        assert_eq!(&rest.buffer[..], b"/ HTTP/1.1");
        assert_eq!(rest.buffer.as_ptr(), joined.buffer[4..].as_ptr());
    }
}
