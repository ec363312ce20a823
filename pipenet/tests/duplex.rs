use std::time::Duration;

use pipenet::{DuplexPipe, PipeOptions, PipeReader};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn read_to_end(input: &mut PipeReader) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let result = tokio::time::timeout(TIMEOUT, input.read())
            .await
            .unwrap()
            .unwrap();
        out.extend_from_slice(&result.buffer);
        input.advance(result.buffer.len()).unwrap();
        if result.is_completed {
            return out;
        }
    }
}

#[tokio::test]
async fn test_sides_are_cross_wired() {
    let (mut a, mut b) = DuplexPipe::create_pair(PipeOptions::default(), PipeOptions::default());

    a.output.write_all(b"from a").await.unwrap();
    b.output.write_all(b"from b").await.unwrap();
    a.output.complete();
    b.output.complete();

    assert_eq!(read_to_end(&mut b.input).await, b"from a");
    assert_eq!(read_to_end(&mut a.input).await, b"from b");
}

#[tokio::test]
async fn test_own_output_does_not_feed_own_input() {
    let (mut a, _b) = DuplexPipe::create_pair(PipeOptions::default(), PipeOptions::default());

    a.output.write_all(b"echo?").await.unwrap();
    assert_eq!(a.input.try_read(), Ok(None));
}

#[tokio::test]
async fn test_options_apply_to_the_reading_side() {
    let tiny = PipeOptions {
        pause_writer_threshold: 4,
        resume_writer_threshold: 2,
        max_buffer_size: 8,
    };
    // Side A reads from the pipe configured by options_a, which B writes
    let (_a, mut b) = DuplexPipe::create_pair(tiny, PipeOptions::default());
    assert_eq!(b.output.capacity(), 8);
    assert_eq!(
        b.output.write(&[0; 9]),
        Err(pipenet::PipeError::BufferFull {
            requested: 9,
            available: 8,
            max: 8
        })
    );
}

#[tokio::test]
async fn test_completing_one_side_ends_the_peer() {
    let (mut a, b) = DuplexPipe::create_pair(PipeOptions::default(), PipeOptions::default());
    let (mut b_input, mut b_output) = b.into_split();

    a.complete();

    let result = b_input.read().await.unwrap();
    assert!(result.is_completed);
    let flushed = b_output.write_all(b"too late").await.unwrap();
    assert!(flushed.is_completed);
}

#[tokio::test]
async fn test_concurrent_directions() {
    let (a, b) = DuplexPipe::create_pair(PipeOptions::default(), PipeOptions::default());
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 13) as u8).collect();

    let spawn_side = |side: DuplexPipe, payload: Vec<u8>| {
        tokio::spawn(async move {
            let (mut input, mut output) = side.into_split();
            let writer = async move {
                output.write_all(&payload).await.unwrap();
                output.complete();
            };
            let (_, received) = tokio::join!(writer, read_to_end(&mut input));
            received
        })
    };

    let from_b = spawn_side(a, payload.clone());
    let from_a = spawn_side(b, payload.clone());

    assert_eq!(from_b.await.unwrap(), payload);
    assert_eq!(from_a.await.unwrap(), payload);
}
