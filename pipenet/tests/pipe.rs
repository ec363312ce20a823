use std::time::Duration;

use pipenet::{Pipe, PipeError, PipeOptions};

const TIMEOUT: Duration = Duration::from_secs(5);

fn small_options() -> PipeOptions {
    PipeOptions {
        pause_writer_threshold: 8,
        resume_writer_threshold: 4,
        max_buffer_size: 32,
    }
}

#[tokio::test]
async fn test_write_is_invisible_until_flush() {
    let (mut reader, mut writer) = Pipe::new(PipeOptions::default());

    assert_eq!(writer.write(b"Hello"), Ok(5));
    assert_eq!(reader.try_read(), Ok(None));

    let flushed = writer.flush().await.unwrap();
    assert!(!flushed.is_completed);

    let result = reader.read().await.unwrap();
    assert_eq!(&result.buffer[..], b"Hello");
    assert!(!result.is_completed);
    assert!(!result.is_canceled);
}

#[tokio::test]
async fn test_multiple_write_read_cycles() {
    let (mut reader, mut writer) = Pipe::new(PipeOptions::default());

    // Cycle 1: write-write-write-flush-read
    assert_eq!(writer.write(b"Hello"), Ok(5));
    assert_eq!(writer.write(b" "), Ok(1));
    assert_eq!(writer.write(b"World"), Ok(5));
    writer.flush().await.unwrap();

    let result = reader.read().await.unwrap();
    assert_eq!(&result.buffer[..], b"Hello World");
    reader.advance(result.buffer.len()).unwrap();

    // Cycle 2
    assert_eq!(writer.write(b"Foo"), Ok(3));
    assert_eq!(writer.write(b"Bar"), Ok(3));
    writer.flush().await.unwrap();

    let result = reader.read().await.unwrap();
    assert_eq!(&result.buffer[..], b"FooBar");
    reader.advance(6).unwrap();

    assert_eq!(writer.tell(), 17);
    assert_eq!(reader.position(), 17);
}

#[tokio::test]
async fn test_read_waits_for_writer() {
    let (mut reader, mut writer) = Pipe::new(PipeOptions::default());

    let read_task = tokio::spawn(async move {
        let result = reader.read().await.unwrap();
        result.buffer.to_vec()
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!read_task.is_finished());

    writer.write(b"late").unwrap();
    writer.flush().await.unwrap();

    let data = tokio::time::timeout(TIMEOUT, read_task).await.unwrap().unwrap();
    assert_eq!(data, b"late");
}

#[tokio::test]
async fn test_bytes_arrive_in_order_across_chunks() {
    let (mut reader, mut writer) = Pipe::new(small_options());
    let expected: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
    let to_send = expected.clone();

    let writer_task = tokio::spawn(async move {
        for chunk in to_send.chunks(7) {
            let result = writer.write_all(chunk).await.unwrap();
            assert!(!result.is_completed);
        }
        writer.complete();
    });

    let mut received = Vec::new();
    loop {
        let result = tokio::time::timeout(TIMEOUT, reader.read())
            .await
            .unwrap()
            .unwrap();
        // Consume an odd amount to exercise partial advances
        let take = result.buffer.len().min(5);
        received.extend_from_slice(&result.buffer[..take]);
        reader.advance_to(take, take).unwrap();
        if result.is_completed && take == result.buffer.len() {
            break;
        }
    }

    writer_task.await.unwrap();
    assert_eq!(received, expected);
}

#[tokio::test]
async fn test_end_of_data_is_not_an_error() {
    let (mut reader, mut writer) = Pipe::new(PipeOptions::default());
    writer.write(b"tail").unwrap();
    writer.complete();

    let result = reader.read().await.unwrap();
    assert_eq!(&result.buffer[..], b"tail");
    assert!(result.is_completed);
    reader.advance(4).unwrap();

    for _ in 0..3 {
        let result = reader.read().await.unwrap();
        assert!(result.buffer.is_empty());
        assert!(result.is_completed);
    }
}

#[tokio::test]
async fn test_error_is_reported_once_after_data() {
    let (mut reader, mut writer) = Pipe::new(PipeOptions::default());
    writer.write(b"partial").unwrap();
    writer.complete_with_error(PipeError::aborted("peer reset"));

    let result = reader.read().await.unwrap();
    assert_eq!(&result.buffer[..], b"partial");
    assert!(!result.is_completed);
    reader.advance(7).unwrap();

    let err = reader.read().await.unwrap_err();
    assert_eq!(err, PipeError::aborted("peer reset"));

    let result = reader.read().await.unwrap();
    assert!(result.is_completed);
    assert!(result.buffer.is_empty());
}

#[tokio::test]
async fn test_write_beyond_capacity_fails() {
    let (_reader, mut writer) = Pipe::new(small_options());

    assert_eq!(writer.write(&[1; 30]), Ok(30));
    assert_eq!(writer.capacity(), 2);
    assert_eq!(
        writer.write(&[2; 3]),
        Err(PipeError::BufferFull {
            requested: 3,
            available: 2,
            max: 32
        })
    );
    assert_eq!(writer.write(&[2; 2]), Ok(2));
}

#[tokio::test]
async fn test_flush_pauses_until_reader_catches_up() {
    let (mut reader, mut writer) = Pipe::new(small_options());

    let mut flush_task = tokio::spawn(async move {
        writer.write(&[7; 10]).unwrap();
        let result = writer.flush().await.unwrap();
        (writer, result)
    });

    // 10 unconsumed bytes >= pause threshold of 8
    assert!(tokio::time::timeout(Duration::from_millis(50), &mut flush_task)
        .await
        .is_err());

    // Consuming 5 leaves 5, still not below the resume threshold of 4
    let result = reader.read().await.unwrap();
    assert_eq!(result.buffer.len(), 10);
    reader.advance(5).unwrap();
    assert!(tokio::time::timeout(Duration::from_millis(50), &mut flush_task)
        .await
        .is_err());

    reader.advance(2).unwrap();
    let (_writer, result) = tokio::time::timeout(TIMEOUT, flush_task)
        .await
        .unwrap()
        .unwrap();
    assert!(!result.is_completed);
}

#[tokio::test]
async fn test_reader_completion_releases_paused_flush() {
    let (mut reader, mut writer) = Pipe::new(small_options());

    let flush_task = tokio::spawn(async move {
        writer.write(&[7; 20]).unwrap();
        let result = writer.flush().await.unwrap();
        assert!(writer.is_reader_completed());
        result
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    reader.complete();

    let result = tokio::time::timeout(TIMEOUT, flush_task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_completed);
}

#[tokio::test]
async fn test_writes_after_reader_completion_are_discarded() {
    let (mut reader, mut writer) = Pipe::new(small_options());
    reader.complete();

    assert_eq!(writer.write(b"nobody listens"), Ok(14));
    let result = writer.flush().await.unwrap();
    assert!(result.is_completed);
    assert_eq!(writer.capacity(), 32);
    assert_eq!(reader.read().await, Err(PipeError::ReaderCompleted));
}

#[tokio::test]
async fn test_cancel_interrupts_pending_read() {
    let (mut reader, _writer) = Pipe::new(PipeOptions::default());
    let canceller = reader.canceller();

    let read_task = tokio::spawn(async move {
        let first = reader.read().await.unwrap();
        (reader, first)
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    canceller.cancel();

    let (mut reader, first) = tokio::time::timeout(TIMEOUT, read_task)
        .await
        .unwrap()
        .unwrap();
    assert!(first.is_canceled);
    assert!(first.buffer.is_empty());

    // Cancellation is consumed: the next read waits again
    assert_eq!(reader.try_read(), Ok(None));
}

#[tokio::test]
async fn test_cancel_before_read_affects_next_read() {
    let (mut reader, _writer) = Pipe::new(PipeOptions::default());
    reader.canceller().cancel();

    let result = reader.read().await.unwrap();
    assert!(result.is_canceled);
}

#[tokio::test]
async fn test_advance_validation() {
    let (mut reader, mut writer) = Pipe::new(PipeOptions::default());
    writer.write(b"abc").unwrap();
    writer.flush().await.unwrap();
    reader.read().await.unwrap();

    assert_eq!(
        reader.advance(4),
        Err(PipeError::InvalidAdvance {
            requested: 4,
            buffered: 3
        })
    );
    assert!(reader.advance_to(2, 1).is_err());
    assert_eq!(reader.advance(3), Ok(()));
}

#[tokio::test]
async fn test_advance_marks_rest_as_examined() {
    let (mut reader, mut writer) = Pipe::new(PipeOptions::default());
    writer.write(b"abcdef").unwrap();
    writer.flush().await.unwrap();

    let result = reader.read().await.unwrap();
    assert_eq!(&result.buffer[..], b"abcdef");

    // Partially examined: the rest is returned again at once
    reader.advance_to(2, 2).unwrap();
    let result = reader.try_read().unwrap().unwrap();
    assert_eq!(&result.buffer[..], b"cdef");

    // Fully examined: wait for more data
    reader.advance(1).unwrap();
    assert_eq!(reader.try_read(), Ok(None));

    writer.write(b"g").unwrap();
    writer.flush().await.unwrap();
    let result = reader.read().await.unwrap();
    assert_eq!(&result.buffer[..], b"defg");
}

#[tokio::test]
async fn test_dropping_writer_completes_pipe() {
    let (mut reader, mut writer) = Pipe::new(PipeOptions::default());

    let read_task = tokio::spawn(async move { reader.read().await });
    writer.write(b"bye").unwrap();
    drop(writer);

    let result = tokio::time::timeout(TIMEOUT, read_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(&result.buffer[..], b"bye");
    assert!(result.is_completed);
}

#[tokio::test]
async fn test_write_after_complete_fails() {
    let (_reader, mut writer) = Pipe::new(PipeOptions::default());
    writer.complete();
    assert!(writer.is_completed());

    assert_eq!(writer.write(b"x"), Err(PipeError::WriterCompleted));
    assert_eq!(writer.flush().await, Err(PipeError::WriterCompleted));
}

#[tokio::test]
async fn test_read_into_copies_and_consumes() {
    let (mut reader, mut writer) = Pipe::new(PipeOptions::default());
    writer.write(b"Hello World").unwrap();
    writer.complete();

    let mut buf = [0u8; 4];
    let mut out = Vec::new();
    loop {
        let n = reader.read_into(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(out, b"Hello World");
    assert_eq!(reader.position(), 11);
}

#[tokio::test]
async fn test_embedded_io_traits() {
    use embedded_io_async::{Read, Write};

    let (mut reader, mut writer) = Pipe::new(small_options());

    let writer_task = tokio::spawn(async move {
        Write::write_all(&mut writer, b"through the async io traits")
            .await
            .unwrap();
        Write::flush(&mut writer).await.unwrap();
    });

    let mut out = Vec::new();
    let mut buf = [0u8; 6];
    loop {
        let n = Read::read(&mut reader, &mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    writer_task.await.unwrap();
    assert_eq!(out, b"through the async io traits");
}
