//! Cross-wired pipe pairs
//!
//! ```text
//!   side A                       side B
//!   output (writer) ──pipe b──▶ input (reader)
//!   input  (reader) ◀──pipe a── output (writer)
//! ```
//!
//! Each side owns only its own reader and writer; neither side references
//! the other, so there is no ownership cycle.

use crate::idgen::IdGen;
use crate::notification_queue::NotificationQueueArc;
use crate::pipe::{Pipe, PipeOptions, PipeReader, PipeWriter};

/// One side of a bidirectional byte channel
#[derive(Debug)]
pub struct DuplexPipe {
    /// Bytes sent by the peer
    pub input: PipeReader,
    /// Bytes for the peer
    pub output: PipeWriter,
}

impl DuplexPipe {
    #[must_use]
    pub fn new(input: PipeReader, output: PipeWriter) -> Self {
        Self { input, output }
    }

    /// Create two paired sides
    ///
    /// `options_a` configures the pipe side A reads from (written by B),
    /// `options_b` the pipe side B reads from (written by A).
    #[must_use]
    pub fn create_pair(options_a: PipeOptions, options_b: PipeOptions) -> (Self, Self) {
        let queue = NotificationQueueArc::new();
        let ids = IdGen::new();
        let (a_input, b_output) = Pipe::with_queue(options_a, &queue, &ids, "duplex.a");
        let (b_input, a_output) = Pipe::with_queue(options_b, &queue, &ids, "duplex.b");
        (Self::new(a_input, a_output), Self::new(b_input, b_output))
    }

    /// Split into `(input, output)`
    #[must_use]
    pub fn into_split(self) -> (PipeReader, PipeWriter) {
        (self.input, self.output)
    }

    /// Complete both directions
    pub fn complete(&mut self) {
        if !self.input.is_completed() {
            self.input.complete();
        }
        if !self.output.is_completed() {
            self.output.complete();
        }
    }
}
