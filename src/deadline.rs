//! Deadline-capable streams
//!
//! Tokio streams have no notion of a deadline, so a connection can only
//! offer `set_deadline` when its stream is wrapped in [`Deadline`]. The
//! wrapper fails pending reads or writes with `io::ErrorKind::TimedOut` once
//! the configured instant passes. Deadlines are absolute and stay in force
//! until they are changed or cleared.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep, sleep_until};

#[derive(Debug, Default)]
struct DeadlineState {
    read: Option<Instant>,
    write: Option<Instant>,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

/// Shared handle for changing the deadlines of a [`Deadline`] stream
///
/// Changing a deadline wakes any read or write currently pending on the
/// stream so the new instant applies to it immediately.
#[derive(Debug, Clone, Default)]
pub struct DeadlineHandle {
    state: Arc<Mutex<DeadlineState>>,
}

impl DeadlineHandle {
    /// Set both the read and the write deadline (`None` clears them)
    pub fn set_deadline(&self, at: Option<Instant>) {
        let mut state = self.state.lock();
        state.read = at;
        state.write = at;
        wake(&mut state.read_waker);
        wake(&mut state.write_waker);
    }

    /// Set the read deadline (`None` clears it)
    pub fn set_read_deadline(&self, at: Option<Instant>) {
        let mut state = self.state.lock();
        state.read = at;
        wake(&mut state.read_waker);
    }

    /// Set the write deadline (`None` clears it)
    pub fn set_write_deadline(&self, at: Option<Instant>) {
        let mut state = self.state.lock();
        state.write = at;
        wake(&mut state.write_waker);
    }

    /// Current read deadline
    pub fn read_deadline(&self) -> Option<Instant> {
        self.state.lock().read
    }

    /// Current write deadline
    pub fn write_deadline(&self) -> Option<Instant> {
        self.state.lock().write
    }

    fn register_read(&self, waker: &Waker) -> Option<Instant> {
        let mut state = self.state.lock();
        register(&mut state.read_waker, waker);
        state.read
    }

    fn register_write(&self, waker: &Waker) -> Option<Instant> {
        let mut state = self.state.lock();
        register(&mut state.write_waker, waker);
        state.write
    }
}

fn wake(slot: &mut Option<Waker>) {
    if let Some(waker) = slot.take() {
        waker.wake();
    }
}

fn register(slot: &mut Option<Waker>, waker: &Waker) {
    match slot {
        Some(current) if current.will_wake(waker) => {}
        _ => *slot = Some(waker.clone()),
    }
}

/// Poll the timer for `deadline`, re-arming it when the deadline moved.
///
/// Returns `Ready` with a `TimedOut` error once the deadline has passed.
fn poll_expired(
    timer: &mut Option<Pin<Box<Sleep>>>,
    deadline: Option<Instant>,
    cx: &mut Context<'_>,
) -> Poll<io::Error> {
    let Some(at) = deadline else {
        *timer = None;
        return Poll::Pending;
    };

    if timer.is_none() {
        *timer = Some(Box::pin(sleep_until(at)));
    }
    let Some(sleep) = timer.as_mut() else {
        return Poll::Pending;
    };
    if sleep.deadline() != at {
        sleep.as_mut().reset(at);
    }

    match sleep.as_mut().poll(cx) {
        Poll::Ready(()) => Poll::Ready(io::Error::new(
            io::ErrorKind::TimedOut,
            "deadline exceeded",
        )),
        Poll::Pending => Poll::Pending,
    }
}

pin_project! {
    /// A stream with read and write deadlines
    ///
    /// # Example
    ///
    /// ```ignore
    /// use sockudo_tcpws::Deadline;
    /// use tokio::time::{Duration, Instant};
    ///
    /// let stream = Deadline::new(tcp_stream);
    /// stream.handle().set_read_deadline(Some(Instant::now() + Duration::from_secs(5)));
    /// ```
    #[derive(Debug)]
    pub struct Deadline<S> {
        #[pin]
        inner: S,
        handle: DeadlineHandle,
        read_timer: Option<Pin<Box<Sleep>>>,
        write_timer: Option<Pin<Box<Sleep>>>,
    }
}

impl<S> Deadline<S> {
    /// Wrap `inner` with no deadlines set
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            handle: DeadlineHandle::default(),
            read_timer: None,
            write_timer: None,
        }
    }

    /// Handle for changing this stream's deadlines
    pub fn handle(&self) -> DeadlineHandle {
        self.handle.clone()
    }

    /// Get a reference to the underlying stream
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the underlying stream
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consume the wrapper and return the underlying stream
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead> AsyncRead for Deadline<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let deadline = this.handle.register_read(cx.waker());
        if let Poll::Ready(err) = poll_expired(this.read_timer, deadline, cx) {
            return Poll::Ready(Err(err));
        }
        this.inner.poll_read(cx, buf)
    }
}

impl<S: AsyncWrite> AsyncWrite for Deadline<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let deadline = this.handle.register_write(cx.waker());
        if let Poll::Ready(err) = poll_expired(this.write_timer, deadline, cx) {
            return Poll::Ready(Err(err));
        }
        this.inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let deadline = this.handle.register_write(cx.waker());
        if let Poll::Ready(err) = poll_expired(this.write_timer, deadline, cx) {
            return Poll::Ready(Err(err));
        }
        this.inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
