//! Shell Filter Tests
//!
//! Tests for CR LF collapsing across arbitrary read boundaries, on both the
//! blocking and the async read path.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use adbwire::shell::{FilterState, ShellLineFilter};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

// =============================================================================
// Helpers
// =============================================================================

/// Expected output: every CR LF replaced by LF, nothing else touched
fn collapse(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == CR && input.get(i + 1) == Some(&LF) {
            out.push(LF);
            i += 2;
        } else {
            out.push(input[i]);
            i += 1;
        }
    }
    out
}

/// Source that never hands out more than `chunk` bytes per read
struct Chunked {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl Chunked {
    fn new(data: &[u8], chunk: usize) -> Self {
        Self {
            data: data.to_vec(),
            pos: 0,
            chunk,
        }
    }
}

impl Read for Chunked {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Async source that answers every other poll with `Pending`
struct Stutter {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    ready: bool,
}

impl Stutter {
    fn new(data: &[u8], chunk: usize) -> Self {
        Self {
            data: data.to_vec(),
            pos: 0,
            chunk,
            ready: false,
        }
    }
}

impl AsyncRead for Stutter {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if !self.ready {
            self.ready = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        self.ready = false;

        let n = self.chunk.min(buf.remaining()).min(self.data.len() - self.pos);
        let start = self.pos;
        buf.put_slice(&self.data[start..start + n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}

/// Source that replays a script of chunks and errors, one step per read
///
/// A chunk bigger than the caller's buffer is split; the rest stays queued.
struct Scripted {
    steps: VecDeque<io::Result<Vec<u8>>>,
}

impl Scripted {
    fn new(steps: Vec<io::Result<&[u8]>>) -> Self {
        Self {
            steps: steps.into_iter().map(|step| step.map(<[u8]>::to_vec)).collect(),
        }
    }

    fn next_into(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            None => Ok(0),
            Some(Err(e)) => Err(e),
            Some(Ok(mut chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.steps.push_front(Ok(chunk.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}

impl Read for Scripted {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.next_into(buf)
    }
}

/// [`Scripted`] on the async path; every step is ready immediately
struct AsyncScripted(Scripted);

impl AsyncRead for AsyncScripted {
    fn poll_read(mut self: Pin<&mut Self>, _: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let n = self.0.next_into(buf.initialize_unfilled())?;
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "read timed out")
}

/// Read to the end, retrying after every error; returns output and error count
fn read_retrying<R: Read>(mut reader: R, request: usize) -> (Vec<u8>, usize) {
    let mut out = Vec::new();
    let mut errors = 0;
    let mut buf = vec![0u8; request];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) => {
                assert_eq!(e.kind(), io::ErrorKind::TimedOut);
                errors += 1;
            }
        }
    }
    (out, errors)
}

struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

/// Deterministic byte soup dense in CR and LF
fn soup(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            match (state >> 33) % 5 {
                0 | 1 => CR,
                2 => LF,
                3 => b'x',
                _ => (state >> 41) as u8,
            }
        })
        .collect()
}

fn read_all_with<R: Read>(mut reader: R, request: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; request];
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

// =============================================================================
// Blocking Path Tests
// =============================================================================

#[test]
fn test_simple_lines() {
    let filter = ShellLineFilter::new(&b"one\r\ntwo\r\n"[..]);
    assert_eq!(read_all_with(filter, 64), b"one\ntwo\n");
}

#[test]
fn test_lone_cr_at_end_passes_through() {
    let filter = ShellLineFilter::new(Chunked::new(b"abc\r", 1));
    assert_eq!(read_all_with(filter, 4), b"abc\r");
}

#[test]
fn test_lone_cr_mid_stream_passes_through() {
    let filter = ShellLineFilter::new(&b"a\rb\r\n"[..]);
    assert_eq!(read_all_with(filter, 16), b"a\rb\n");
}

#[test]
fn test_cr_cr_lf_collapses_second_only() {
    for chunk in 1..=3 {
        for request in 1..=4 {
            let filter = ShellLineFilter::new(Chunked::new(&[CR, CR, LF], chunk));
            assert_eq!(read_all_with(filter, request), [CR, LF], "chunk {} request {}", chunk, request);
        }
    }
}

#[test]
fn test_crlf_split_across_reads() {
    let mut filter = ShellLineFilter::new(Chunked::new(b"ab\r\ncd", 3));
    let mut buf = [0u8; 3];

    // "ab\r" arrives; the trailing CR is resolved by peeking the LF.
    let n = filter.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"ab\n");
    assert_eq!(filter.state(), FilterState::Idle);

    let n = filter.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"cd");
}

#[test]
fn test_peeked_byte_is_held_not_lost() {
    let mut filter = ShellLineFilter::new(Chunked::new(b"a\rz", 2));
    let mut buf = [0u8; 2];

    let n = filter.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"a\r");
    assert_eq!(filter.state(), FilterState::HoldingPendingByte(b'z'));

    let n = filter.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"z");
    assert_eq!(filter.state(), FilterState::Idle);
    assert_eq!(filter.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_full_request_is_topped_up() {
    // Four bytes asked for, one CR LF collapsed: the fourth byte is refilled.
    let mut filter = ShellLineFilter::new(&b"a\r\nbc"[..]);
    let mut buf = [0u8; 4];
    let n = Read::read(&mut filter, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"a\nbc");
}

#[test]
fn test_short_read_is_not_topped_up() {
    let mut filter = ShellLineFilter::new(Chunked::new(b"a\r\nbcdef", 3));
    let mut buf = [0u8; 8];
    let n = filter.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"a\n");
}

#[test]
fn test_empty_request() {
    let mut filter = ShellLineFilter::new(&b"abc"[..]);
    assert_eq!(Read::read(&mut filter, &mut []).unwrap(), 0);
    assert_eq!(read_all_with(filter, 8), b"abc");
}

#[test]
fn test_error_propagates() {
    struct Broken;
    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "gone"))
        }
    }

    let mut filter = ShellLineFilter::new(Broken);
    let err = filter.read(&mut [0u8; 4]).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
}

#[test]
fn test_error_during_lookahead_loses_nothing() {
    for request in [4, 5, 16] {
        let source = Scripted::new(vec![Ok(&b"abc\r"[..]), Err(timed_out()), Ok(&b"\nxyz"[..])]);
        let (out, errors) = read_retrying(ShellLineFilter::new(source), request);
        assert_eq!(out, b"abc\nxyz", "request {}", request);
        assert_eq!(errors, 1, "request {}", request);
    }
}

#[test]
fn test_error_during_top_up_keeps_collapsed_bytes() {
    let source = Scripted::new(vec![Ok(&b"a\r\nb"[..]), Err(timed_out()), Ok(&b"c\r\n"[..])]);
    let mut filter = ShellLineFilter::new(source);
    let mut buf = [0u8; 4];

    // The CR LF left room for a fourth byte; the failed top-up gives up on it.
    let n = filter.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"a\nb");
    assert_eq!(filter.state(), FilterState::Idle);

    assert_eq!(filter.read(&mut buf).unwrap_err().kind(), io::ErrorKind::TimedOut);
    let n = filter.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"c\n");
}

#[test]
fn test_error_after_held_cr_in_top_up() {
    // "x\r\ny\r" fills five bytes, collapses to four ending in CR, and the
    // top-up fails: the CR is held instead of being resolved.
    let source = Scripted::new(vec![Ok(&b"x\r\ny\r"[..]), Err(timed_out()), Ok(&b"\nz"[..])]);
    let (out, errors) = read_retrying(ShellLineFilter::new(source), 5);
    assert_eq!(out, b"x\ny\nz");
    assert_eq!(errors, 1);
}

#[test]
fn test_output_independent_of_chunking() {
    for seed in 0..20u64 {
        let input = soup(seed, 300);
        let expected = collapse(&input);

        for chunk in [1, 2, 3, 7, 64, 512] {
            for request in [1, 2, 5, 16, 300] {
                let filter = ShellLineFilter::new(Chunked::new(&input, chunk));
                assert_eq!(
                    read_all_with(filter, request),
                    expected,
                    "seed {} chunk {} request {}",
                    seed,
                    chunk,
                    request
                );
            }
        }
    }
}

#[test]
fn test_into_inner_returns_pending_byte() {
    let mut filter = ShellLineFilter::new(Chunked::new(b"\rq", 1));
    let mut buf = [0u8; 1];
    assert_eq!(filter.read(&mut buf).unwrap(), 1);
    assert_eq!(buf[0], CR);

    let (_, pending) = filter.into_inner();
    assert_eq!(pending, Some(b'q'));
}

// =============================================================================
// Async Path Tests
// =============================================================================

#[tokio::test]
async fn test_async_matches_blocking() {
    for seed in 0..10u64 {
        let input = soup(seed, 200);
        let expected = collapse(&input);

        for chunk in [1, 3, 64] {
            for request in [1, 4, 200] {
                let mut filter = ShellLineFilter::new(Stutter::new(&input, chunk));
                let mut out = Vec::new();
                let mut buf = vec![0u8; request];
                loop {
                    let n = filter.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    out.extend_from_slice(&buf[..n]);
                }
                assert_eq!(out, expected, "seed {} chunk {} request {}", seed, chunk, request);
            }
        }
    }
}

#[tokio::test]
async fn test_async_read_to_end() {
    let mut filter = ShellLineFilter::new(Stutter::new(b"x\r\ny\r", 2));
    let mut out = Vec::new();
    filter.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"x\ny\r");
}

#[tokio::test]
async fn test_async_error_during_lookahead_loses_nothing() {
    let source = Scripted::new(vec![Ok(&b"abc\r"[..]), Err(timed_out()), Ok(&b"\nxyz"[..])]);
    let mut filter = ShellLineFilter::new(AsyncScripted(source));
    let mut out = Vec::new();
    let mut buf = [0u8; 16];

    let n = filter.read(&mut buf).await.unwrap();
    out.extend_from_slice(&buf[..n]);
    assert_eq!(filter.state(), FilterState::HoldingPendingByte(CR));

    let err = filter.read(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::TimedOut);

    filter.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"abc\nxyz");
}

#[tokio::test]
async fn test_async_error_during_top_up_keeps_collapsed_bytes() {
    let source = Scripted::new(vec![Ok(&b"a\r\nb"[..]), Err(timed_out()), Ok(&b"c"[..])]);
    let mut filter = ShellLineFilter::new(AsyncScripted(source));
    let mut buf = [0u8; 4];

    let n = filter.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"a\nb");
    assert!(filter.read(&mut buf).await.is_err());

    let mut rest = Vec::new();
    filter.read_to_end(&mut rest).await.unwrap();
    assert_eq!(rest, b"c");
}

/// Abandoning every poll that returns `Pending` models a read cancelled at
/// each suspension point; the retried reads must still see every byte once.
#[test]
fn test_async_cancel_and_retry_is_lossless() {
    let waker = Waker::from(Arc::new(NoopWake));
    let mut cx = Context::from_waker(&waker);

    for seed in 0..10u64 {
        let input = soup(seed, 150);
        let expected = collapse(&input);

        for chunk in [1, 2, 5] {
            let mut filter = ShellLineFilter::new(Stutter::new(&input, chunk));
            let mut out = Vec::new();
            let mut storage = [0u8; 3];

            loop {
                let mut buf = ReadBuf::new(&mut storage);
                match Pin::new(&mut filter).poll_read(&mut cx, &mut buf) {
                    Poll::Ready(Ok(())) if buf.filled().is_empty() => break,
                    Poll::Ready(Ok(())) => out.extend_from_slice(buf.filled()),
                    Poll::Ready(Err(e)) => panic!("unexpected error {}", e),
                    Poll::Pending => continue,
                }
            }
            assert_eq!(out, expected, "seed {} chunk {}", seed, chunk);
        }
    }
}
