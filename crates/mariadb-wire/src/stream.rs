//! Byte-stream capability shared by the blocking and async paths.
//!
//! The protocol state machine is written once against [`PacketStream`].
//! [`AsyncStream`] suspends on asupersync's TCP stream; [`BlockingStream`]
//! wraps any `Read + Write` and completes every future immediately, so
//! [`block_on`] can drive the same state machine on the calling thread.

use std::future::Future;
use std::io::{self, Read, Write};
use std::pin::pin;
use std::task::{Context, Poll, Waker};

use asupersync::io::{AsyncRead, AsyncWrite, ReadBuf};
use asupersync::net::TcpStream;

/// Duplex byte stream the packet framer reads from and writes to.
pub trait PacketStream {
    /// Read at least one byte into `buf`; `Ok(0)` means end of stream.
    fn read_some(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>>;

    /// Write the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<()>>;

    /// Flush buffered output.
    fn flush(&mut self) -> impl Future<Output = io::Result<()>>;

    /// Whether the channel is encrypted (permits clear-text passwords).
    fn is_secure(&self) -> bool {
        false
    }
}

/// Blocking adapter over a `Read + Write` transport.
#[derive(Debug)]
pub struct BlockingStream<T> {
    inner: T,
    secure: bool,
}

impl<T: Read + Write> BlockingStream<T> {
    /// Wrap a plain transport.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            secure: false,
        }
    }

    /// Mark the transport as encrypted (e.g. a caller-provided TLS stream).
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Access the wrapped transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Access the wrapped transport mutably.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: Read + Write> PacketStream for BlockingStream<T> {
    fn read_some(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> {
        let result = loop {
            match self.inner.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                other => break other,
            }
        };
        std::future::ready(result)
    }

    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<()>> {
        std::future::ready(self.inner.write_all(buf))
    }

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        std::future::ready(self.inner.flush())
    }

    fn is_secure(&self) -> bool {
        self.secure
    }
}

/// Non-blocking stream over asupersync's TCP socket.
pub struct AsyncStream {
    inner: TcpStream,
}

impl std::fmt::Debug for AsyncStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncStream").finish_non_exhaustive()
    }
}

impl AsyncStream {
    /// Wrap a connected socket.
    pub fn new(inner: TcpStream) -> Self {
        Self { inner }
    }
}

impl PacketStream for AsyncStream {
    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stream = &mut self.inner;
        let mut read_buf = ReadBuf::new(buf);
        std::future::poll_fn(|cx| std::pin::Pin::new(&mut *stream).poll_read(cx, &mut read_buf))
            .await?;
        Ok(read_buf.filled().len())
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let stream = &mut self.inner;
        let mut written = 0;
        while written < buf.len() {
            let n = std::future::poll_fn(|cx| {
                std::pin::Pin::new(&mut *stream).poll_write(cx, &buf[written..])
            })
            .await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "connection closed while writing packet",
                ));
            }
            written += n;
        }
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        let stream = &mut self.inner;
        std::future::poll_fn(|cx| std::pin::Pin::new(&mut *stream).poll_flush(cx)).await
    }
}

/// Drive a future to completion on the current thread.
///
/// Meant for futures built on [`BlockingStream`], whose I/O never returns
/// `Pending`; anything else is polled again after yielding the thread.
pub fn block_on<F: Future>(future: F) -> F::Output {
    let mut future = pin!(future);
    let mut cx = Context::from_waker(Waker::noop());
    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(out) => return out,
            Poll::Pending => std::thread::yield_now(),
        }
    }
}
