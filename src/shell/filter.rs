//! CR LF filter for shell output
//!
//! Device shells running under a pty turn every LF into CR LF. The filter
//! undoes that on the read direction only, byte for byte, however the caller
//! chunks its reads.
//!
//! The algorithm is written once against a poll-style byte source so that the
//! blocking ([`std::io::Read`]) and suspendable ([`tokio::io::AsyncRead`])
//! implementations cannot drift apart.

use std::io::{self, Read};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

/// Cross-call state of the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterState {
    /// Nothing carried over
    #[default]
    Idle,

    /// One byte was taken from the source but not delivered yet; it is
    /// emitted first on the next read
    HoldingPendingByte(u8),
}

/// Read-only stream adapter that collapses CR LF back to LF
///
/// No seeking is performed: the source is typically a socket.
#[derive(Debug)]
pub struct ShellLineFilter<R> {
    inner: R,
    state: FilterState,

    /// Source error hit after bytes were taken; returned by the next read
    deferred: Option<io::Error>,
}

impl<R> ShellLineFilter<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: FilterState::Idle,
            deferred: None,
        }
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Unwrap the source; a held pending byte is returned alongside it
    pub fn into_inner(self) -> (R, Option<u8>) {
        let pending = match self.state {
            FilterState::Idle => None,
            FilterState::HoldingPendingByte(b) => Some(b),
        };
        (self.inner, pending)
    }
}

impl<R: Read> Read for ShellLineFilter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let inner = &mut self.inner;
        let polled = filter_read(&mut self.state, &mut self.deferred, buf, |chunk| {
            Poll::Ready(inner.read(chunk))
        });
        match polled {
            Poll::Ready(result) => result,
            // A blocking source never returns Pending.
            Poll::Pending => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ShellLineFilter<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let inner = &mut this.inner;
        let out = buf.initialize_unfilled();

        let polled = filter_read(&mut this.state, &mut this.deferred, out, |chunk| {
            let mut chunk_buf = ReadBuf::new(chunk);
            match Pin::new(&mut *inner).poll_read(cx, &mut chunk_buf) {
                Poll::Ready(Ok(())) => Poll::Ready(Ok(chunk_buf.filled().len())),
                Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                Poll::Pending => Poll::Pending,
            }
        });

        match polled {
            Poll::Ready(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// One filtered read into `buf`
///
/// `source` fills a slice and reports the byte count; `Ok(0)` means end of
/// stream. `Pending` from the source counts as "currently exhausted": bytes
/// already taken are delivered, and an unclassifiable trailing CR is held
/// as the pending byte instead of being peeked past. The filter only returns
/// `Pending` when it has nothing to deliver, so a dropped future never loses
/// or duplicates a byte.
///
/// A source error is treated the same way once bytes have been taken: they
/// are delivered, and the error is parked in `deferred` for the next read.
fn filter_read<F>(
    state: &mut FilterState,
    deferred: &mut Option<io::Error>,
    buf: &mut [u8],
    mut source: F,
) -> Poll<io::Result<usize>>
where
    F: FnMut(&mut [u8]) -> Poll<io::Result<usize>>,
{
    let requested = buf.len();
    if requested == 0 {
        return Poll::Ready(Ok(0));
    }
    if let Some(e) = deferred.take() {
        return Poll::Ready(Err(e));
    }

    // Step 1: pending byte first, then the remainder from the source. The
    // pending byte is only released once the source read succeeded.
    let pending = match *state {
        FilterState::Idle => None,
        FilterState::HoldingPendingByte(b) => Some(b),
    };
    let start = usize::from(pending.is_some());
    let read = if start < requested {
        match source(&mut buf[start..]) {
            Poll::Ready(Ok(n)) => n,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending if pending.is_none() => return Poll::Pending,
            Poll::Pending => 0,
        }
    } else {
        0
    };
    if let Some(b) = pending {
        buf[0] = b;
        *state = FilterState::Idle;
    }
    let filled = start + read;

    // Steps 2 and 3: collapse, then top the buffer back up one byte at a
    // time when the source had filled the whole request.
    let mut end = collapse_crlf(buf, 0, filled);
    let mut stalled = false;
    if filled == requested {
        while end < requested {
            let scan_from = end.saturating_sub(1);
            match source(&mut buf[end..end + 1]) {
                Poll::Ready(Ok(0)) => break,
                Poll::Ready(Ok(_)) => end = collapse_crlf(buf, scan_from, end + 1),
                // end > 0 here: a full buffer never collapses to nothing.
                Poll::Ready(Err(e)) => {
                    tracing::trace!("Deferring shell source error: {}", e);
                    *deferred = Some(e);
                    stalled = true;
                    break;
                }
                Poll::Pending => {
                    stalled = true;
                    break;
                }
            }
        }
    }

    // Step 4: a trailing CR needs one byte of lookahead, unless the source
    // just stalled and would only be asked again for nothing.
    if end > 0 && buf[end - 1] == CR {
        let peeked = if stalled { Poll::Pending } else { peek(&mut source) };
        match peeked {
            // End of stream: a lone CR passes through.
            Poll::Ready(Ok(None)) => {}
            Poll::Ready(Ok(Some(LF))) => buf[end - 1] = LF,
            Poll::Ready(Ok(Some(b))) => *state = FilterState::HoldingPendingByte(b),
            Poll::Ready(Err(e)) => {
                end -= 1;
                buf[end] = 0;
                *state = FilterState::HoldingPendingByte(CR);
                if end == 0 {
                    return Poll::Ready(Err(e));
                }
                tracing::trace!("Deferring shell source error: {}", e);
                *deferred = Some(e);
            }
            Poll::Pending => {
                end -= 1;
                buf[end] = 0;
                *state = FilterState::HoldingPendingByte(CR);
                if end == 0 {
                    return Poll::Pending;
                }
            }
        }
    }

    Poll::Ready(Ok(end))
}

/// Take one byte from `source`; `None` at end of stream
fn peek<F>(source: &mut F) -> Poll<io::Result<Option<u8>>>
where
    F: FnMut(&mut [u8]) -> Poll<io::Result<usize>>,
{
    let mut next = [0u8; 1];
    match source(&mut next) {
        Poll::Ready(Ok(0)) => Poll::Ready(Ok(None)),
        Poll::Ready(Ok(_)) => Poll::Ready(Ok(Some(next[0]))),
        Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
        Poll::Pending => Poll::Pending,
    }
}

/// Collapse every CR LF in `buf[start..end]` to LF, shifting later bytes left
/// and zeroing the vacated tail. Returns the new end.
fn collapse_crlf(buf: &mut [u8], start: usize, end: usize) -> usize {
    let mut src = start;
    let mut dst = start;

    while src < end {
        if buf[src] == CR && src + 1 < end && buf[src + 1] == LF {
            buf[dst] = LF;
            src += 2;
        } else {
            buf[dst] = buf[src];
            src += 1;
        }
        dst += 1;
    }

    buf[dst..end].fill(0);
    dst
}
