//! Transport abstractions: channels, listeners, dialers.
//!
//! A protocol contributes a [`Dialer`] (client side) and a [`ListenFactory`]
//! (server side). Both produce [`Channel`]s, the shareable handle the manager
//! keeps for teardown and the collaborators use for I/O.
//!
//! # Closing
//!
//! [`Channel::close`] never waits for a task that holds the stream. I/O
//! through a [`StreamGuard`] fails as soon as the channel is closed, which
//! wakes a reader parked on a silent peer; the socket is dropped when that
//! guard is released.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture, WaitForCancellationFutureOwned};

use super::RpcError;
use crate::config::TcpConfig;

/// Byte stream carried by a [`Channel`].
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Stream for T {}

/// Boxed byte stream.
pub type BoxStream = Box<dyn Stream>;

/// Shareable handle on one established connection.
///
/// Cloning is cheap; all clones see the same stream and the same closed
/// state. Closing is idempotent.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    protocol: String,
    peer: String,
    stream: Arc<Mutex<Option<BoxStream>>>,
    closed: CancellationToken,
}

impl Channel {
    /// Wrap `stream`, connected over `protocol` to `peer`.
    pub fn new(protocol: impl Into<String>, peer: impl Into<String>, stream: impl Stream) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                protocol: protocol.into(),
                peer: peer.into(),
                stream: Arc::new(Mutex::new(Some(Box::new(stream)))),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Protocol this channel was established over.
    pub fn protocol(&self) -> &str {
        &self.inner.protocol
    }

    /// Remote address as reported by the transport.
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// Exclusive access to the stream.
    ///
    /// The guard owns its lock, so it can be held across `.await` points in
    /// spawned tasks.
    ///
    /// # Errors
    ///
    /// [`RpcError::ChannelClosed`] once the channel has been closed, including
    /// while waiting for another holder to let go.
    pub async fn lock(&self) -> Result<StreamGuard, RpcError> {
        if self.is_closed() {
            return Err(RpcError::ChannelClosed);
        }
        let stream = Arc::clone(&self.inner.stream);
        let guard = tokio::select! {
            _ = self.closed() => return Err(RpcError::ChannelClosed),
            guard = stream.lock_owned() => guard,
        };
        if guard.is_none() || self.is_closed() {
            return Err(RpcError::ChannelClosed);
        }
        Ok(StreamGuard {
            stream: guard,
            token: self.inner.closed.clone(),
            closed: Box::pin(self.inner.closed.clone().cancelled_owned()),
        })
    }

    /// Close the channel.
    ///
    /// Wakes every holder and waiter first. If nobody holds the stream, its
    /// write half is shut down here; otherwise the holder drops it on
    /// release.
    pub async fn close(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        self.inner.closed.cancel();
        let stream = match Arc::clone(&self.inner.stream).try_lock_owned() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(mut stream) = stream {
            // The peer may already be gone.
            let _ = stream.shutdown().await;
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the channel is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.inner.closed.cancelled()
    }

    /// Whether both handles refer to the same connection.
    pub fn same_channel(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Exclusive, owned access to a [`Channel`]'s stream.
///
/// Reads and writes fail with [`io::ErrorKind::ConnectionAborted`] once the
/// channel is closed, even if they are already pending.
pub struct StreamGuard {
    stream: OwnedMutexGuard<Option<BoxStream>>,
    token: CancellationToken,
    closed: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl StreamGuard {
    fn poll_closed(&mut self, cx: &mut Context<'_>) -> bool {
        // A completed cancellation future is never polled again.
        self.token.is_cancelled() || self.closed.as_mut().poll(cx).is_ready()
    }

    fn live(&mut self, cx: &mut Context<'_>) -> io::Result<&mut BoxStream> {
        if self.poll_closed(cx) {
            return Err(closed_error());
        }
        (*self.stream).as_mut().ok_or_else(closed_error)
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "channel closed")
}

impl AsyncRead for StreamGuard {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().live(cx) {
            Ok(stream) => Pin::new(stream).poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for StreamGuard {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().live(cx) {
            Ok(stream) => Pin::new(stream).poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().live(cx) {
            Ok(stream) => Pin::new(stream).poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_closed(cx) {
            return Poll::Ready(Ok(()));
        }
        match (*this.stream).as_mut() {
            Some(stream) => Pin::new(stream).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.token.is_cancelled() {
            self.stream.take();
        }
    }
}

impl fmt::Debug for StreamGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamGuard")
            .field("closed", &self.token.is_cancelled())
            .finish()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("protocol", &self.inner.protocol)
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Server side of a protocol: accepts inbound channels.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Protocol this listener accepts.
    fn protocol(&self) -> &str;

    /// Wait for the next inbound connection.
    async fn accept(&self) -> io::Result<Channel>;

    /// Local address the listener is bound to.
    fn local_addr(&self) -> io::Result<String>;
}

/// Boxed listener.
pub type BoxListener = Box<dyn Listener>;

/// Client strategy of a protocol.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `target`, or to the protocol's configured default when
    /// `None`.
    async fn dial(&self, target: Option<&str>) -> io::Result<Channel>;
}

/// Server strategy of a protocol.
#[async_trait]
pub trait ListenFactory: Send + Sync {
    /// Bind a fresh listener on the protocol's configured address.
    async fn listen(&self) -> io::Result<BoxListener>;
}

/// TCP strategy for both sides.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    listen_address: String,
    dial_address: String,
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Build from configuration.
    pub fn new(config: &TcpConfig) -> Self {
        Self {
            listen_address: config.listen_address.clone(),
            dial_address: config.dial_address.clone(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

#[async_trait]
impl Dialer for TcpTransport {
    async fn dial(&self, target: Option<&str>) -> io::Result<Channel> {
        let address = target.unwrap_or(self.dial_address.as_str());
        let stream = tokio::time::timeout(
            self.connect_timeout,
            tokio::net::TcpStream::connect(address),
        )
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {address} timed out"),
            )
        })??;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?.to_string();
        Ok(Channel::new(super::TCP, peer, stream))
    }
}

#[async_trait]
impl ListenFactory for TcpTransport {
    async fn listen(&self) -> io::Result<BoxListener> {
        Ok(Box::new(TcpAcceptor::bind(&self.listen_address).await?))
    }
}

/// TCP [`Listener`].
#[derive(Debug)]
pub struct TcpAcceptor {
    inner: tokio::net::TcpListener,
}

impl TcpAcceptor {
    /// Bind `address`.
    pub async fn bind(address: &str) -> io::Result<Self> {
        Ok(Self {
            inner: tokio::net::TcpListener::bind(address).await?,
        })
    }

    /// Wrap an already bound listener.
    pub fn from_listener(inner: tokio::net::TcpListener) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Listener for TcpAcceptor {
    fn protocol(&self) -> &str {
        super::TCP
    }

    async fn accept(&self) -> io::Result<Channel> {
        let (stream, addr) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok(Channel::new(super::TCP, addr.to_string(), stream))
    }

    fn local_addr(&self) -> io::Result<String> {
        Ok(self.inner.local_addr()?.to_string())
    }
}
