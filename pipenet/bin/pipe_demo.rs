//! Pipe CLI Demo
//!
//! Demonstrates the pipe with a deliberately small buffer: stdin lines are
//! written and flushed, a slow reader drains them in 4-byte pieces, and the
//! writer is paused whenever the reader falls behind.
//!
//! Run with `RUST_LOG=trace` to see the pause/resume notifications.

use std::time::Duration;

use pipenet::{Pipe, PipeOptions, PipeReader, PipeWriter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let options = PipeOptions {
        pause_writer_threshold: 16,
        resume_writer_threshold: 8,
        max_buffer_size: 64,
    };
    options.validate()?;
    let (reader, writer) = Pipe::new(options);

    let writer_task = tokio::spawn(write_lines(writer));
    let reader_task = tokio::spawn(read_slowly(reader));

    let (written, read) = tokio::join!(writer_task, reader_task);
    println!("Written {} bytes, read {} bytes", written?, read?);
    Ok(())
}

async fn write_lines(mut writer: PipeWriter) -> u64 {
    println!("Enter text (empty line to quit):");

    let stdin = tokio::io::stdin();
    let reader = tokio::io::BufReader::new(stdin);
    let mut lines = tokio::io::AsyncBufReadExt::lines(reader);

    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }

        match writer.write_all(trimmed.as_bytes()).await {
            Ok(result) if result.is_completed => {
                eprintln!("Reader is gone");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("Write error: {e}");
                break;
            }
        }
    }

    writer.complete();
    println!("Writer completed");
    writer.tell()
}

async fn read_slowly(mut reader: PipeReader) -> u64 {
    let mut buf = [0u8; 4];

    loop {
        match reader.read_into(&mut buf).await {
            Ok(0) => {
                println!("(reader) EOF");
                break;
            }
            Ok(n) => {
                let data = String::from_utf8_lossy(buf.get(..n).unwrap_or_default());
                println!("(reader): {data}");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => {
                eprintln!("(reader) Error: {e}");
                break;
            }
        }
    }

    reader.position()
}
