//! Client builder and runtime.
//!
//! The [`ClientBuilder`] configures the codec and timeouts. The [`Client`]
//! manages the lifecycle of one connection:
//! 1. Send the handshake line
//! 2. Spawn the receive loop
//! 3. Issue calls, each under the connection-wide send lock
//! 4. Route every response to its pending call by sequence number
//!
//! # Example
//!
//! ```ignore
//! use seqwire::Client;
//!
//! #[tokio::main]
//! async fn main() -> seqwire::Result<()> {
//!     let client = Client::builder().dial("127.0.0.1:9999").await?;
//!
//!     let sum: i64 = client.call("Arith.Sum", &(1, 2)).await?;
//!     assert_eq!(sum, 3);
//!
//!     client.close().await
//! }
//! ```

mod call;
mod pending;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::codec::{Codec, MsgPackCodec};
use crate::error::{Result, RpcError};
use crate::protocol::{
    write_handshake, FrameReader, FrameWriter, Handshake, Header, DEFAULT_MAX_FRAME_SIZE,
    NO_CALL_SEQ,
};

pub use call::Call;
use pending::PendingCalls;

/// Default timeout for dialing and negotiating a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builder for configuring and connecting a [`Client`].
pub struct ClientBuilder {
    codec: Arc<dyn Codec>,
    call_timeout: Option<Duration>,
    connect_timeout: Duration,
    max_frame_size: u32,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            codec: Arc::new(MsgPackCodec),
            call_timeout: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the codec announced in the handshake and used for every frame.
    ///
    /// Default: MsgPack
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Set a timeout applied by [`Client::call`].
    ///
    /// Default: none
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Set the timeout for [`ClientBuilder::dial`], handshake included.
    ///
    /// Default: 10 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the largest header or body part accepted or sent.
    ///
    /// Default: 100 MiB
    pub fn max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Run the handshake over an established stream and start the client.
    pub async fn connect<S>(self, stream: S) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        write_handshake(&mut write_half, &Handshake::new(self.codec.codec_type())).await?;

        let reader = FrameReader::new(BufReader::new(read_half), self.codec.clone())
            .with_max_frame_size(self.max_frame_size);
        let writer = FrameWriter::new(write_half, self.codec.clone())
            .with_max_frame_size(self.max_frame_size);

        tracing::debug!("Client connected using {}", self.codec.codec_type());
        Ok(Client::start(reader, writer, self.call_timeout))
    }

    /// Connect over TCP, then run the handshake.
    pub async fn dial<A: ToSocketAddrs>(self, addr: A) -> Result<Client> {
        let timeout = self.connect_timeout;
        let connect = async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            self.connect(stream).await
        };

        tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| RpcError::Timeout(timeout))?
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State guarded by the send lock.
struct SendState {
    writer: FrameWriter,
    /// Reused for every request.
    header: Header,
}

struct ClientInner {
    codec: Arc<dyn Codec>,
    sending: Mutex<SendState>,
    pending: PendingCalls,
    /// Set once the connection is going away; interrupts a stalled write.
    stopped: watch::Sender<bool>,
}

impl ClientInner {
    /// Register the call and write its request frame.
    async fn send(&self, call: Call) -> u64 {
        let body = match self.codec.encode(&call.args) {
            Ok(body) => body,
            Err(e) => {
                call.fail(e);
                return NO_CALL_SEQ;
            }
        };

        let mut sending = self.sending.lock().await;
        let SendState { writer, header } = &mut *sending;
        header.service_method.clone_from(&call.service_method);

        let seq = match self.pending.register(call) {
            Ok(seq) => seq,
            Err((err, call)) => {
                call.fail(err);
                return NO_CALL_SEQ;
            }
        };
        header.seq = seq;
        header.error.clear();

        let written = tokio::select! {
            written = writer.write_encoded(header, &body) => written,
            _ = wait_stopped(self.stopped.subscribe()) => Err(RpcError::Shutdown),
        };

        if let Err(e) = written {
            if matches!(e, RpcError::Shutdown) {
                // a frame may have been cut short
                let _ = writer.close().await;
            }
            if let Some(call) = self.pending.remove(seq) {
                call.fail(e);
            }
        }
        seq
    }

    /// Fail every pending call and interrupt any write in progress.
    fn terminate(&self, err: RpcError) {
        let count = self.pending.terminate_all(err.clone());
        self.stopped.send_replace(true);
        if count > 0 {
            tracing::debug!("Resolved {} pending calls with: {}", count, err);
        }
    }
}

/// Resolve once the connection has been told to stop.
async fn wait_stopped(mut stopped: watch::Receiver<bool>) {
    let _ = stopped.wait_for(|stopped| *stopped).await;
}

/// A connected RPC client.
///
/// Any number of calls may be in flight at once; responses are matched to
/// calls by sequence number, in whatever order they arrive.
pub struct Client {
    inner: Arc<ClientInner>,
    receiver: JoinHandle<()>,
    default_timeout: Option<Duration>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    fn start<R>(
        reader: FrameReader<R>,
        writer: FrameWriter,
        default_timeout: Option<Duration>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let inner = Arc::new(ClientInner {
            codec: writer.codec().clone(),
            sending: Mutex::new(SendState {
                writer,
                header: Header::default(),
            }),
            pending: PendingCalls::new(),
            stopped: watch::channel(false).0,
        });

        let receiver = tokio::spawn(receive_loop(inner.clone(), reader));

        Self {
            inner,
            receiver,
            default_timeout,
        }
    }

    /// Issue a call without waiting for its reply.
    ///
    /// The finished [`Call`] is delivered on `done`, which is never waited on:
    /// if it is full the completion is dropped with a warning, so size it for
    /// every call that shares it. Returns the assigned sequence number, or
    /// [`NO_CALL_SEQ`] if the call failed before it was registered (it is
    /// still delivered on `done`).
    pub async fn go<A>(&self, service_method: &str, args: &A, done: mpsc::Sender<Call>) -> u64
    where
        A: Serialize + ?Sized,
    {
        let call = match serde_json::to_value(args) {
            Ok(args) => Call::new(service_method, args, done),
            Err(e) => {
                Call::new(service_method, Value::Null, done).fail(RpcError::Encode(e.to_string()));
                return NO_CALL_SEQ;
            }
        };

        // The send runs in its own task so a dropped caller future cannot cut a frame in half.
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.send(call).await })
            .await
            .unwrap_or(NO_CALL_SEQ)
    }

    /// Issue a call and wait for its reply.
    ///
    /// Uses the builder's call timeout when one was set. Dropping the future
    /// stops the wait; the call stays registered until its response arrives
    /// or the connection goes away.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        match self.default_timeout {
            Some(timeout) => self.call_timeout(service_method, args, timeout).await,
            None => self.call_and_wait(service_method, args).await,
        }
    }

    /// Issue a call and wait at most `timeout` for its reply.
    pub async fn call_timeout<A, R>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        tokio::time::timeout(timeout, self.call_and_wait(service_method, args))
            .await
            .map_err(|_| RpcError::Timeout(timeout))?
    }

    async fn call_and_wait<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let (done, mut completed) = mpsc::channel(1);
        self.go(service_method, args, done).await;

        match completed.recv().await {
            Some(call) => call.reply(),
            None => Err(RpcError::Shutdown),
        }
    }

    /// Close the connection and fail every pending call with
    /// [`RpcError::Shutdown`].
    ///
    /// Pending calls are resolved before the stream is shut down, and a
    /// write stalled on a peer that stopped reading is abandoned.
    /// Returns [`RpcError::Shutdown`] if the client is already closing.
    pub async fn close(&self) -> Result<()> {
        self.inner.pending.set_closing()?;

        self.receiver.abort();
        self.inner.terminate(RpcError::Shutdown);

        let mut sending = self.inner.sending.lock().await;
        sending.writer.close().await
    }

    /// True while the client is neither closing nor shut down.
    pub fn is_available(&self) -> bool {
        self.inner.pending.is_available()
    }

    /// Number of calls still awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.receiver.abort();
        self.inner.terminate(RpcError::Shutdown);
    }
}

/// Read responses until the stream fails, then fail whatever is left.
async fn receive_loop<R>(inner: Arc<ClientInner>, mut reader: FrameReader<R>)
where
    R: AsyncRead + Unpin,
{
    let err = loop {
        if let Err(e) = receive_one(&inner, &mut reader).await {
            break e;
        }
    };

    let err = if inner.pending.is_closing() {
        RpcError::Shutdown
    } else {
        tracing::warn!("Receive loop stopped: {}", err);
        err
    };
    inner.terminate(err);
}

/// Read one response frame and resolve its call.
///
/// The call is only removed from the registry after its body has been read,
/// so no call is ever held across an await point.
async fn receive_one<R>(inner: &ClientInner, reader: &mut FrameReader<R>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let header = reader.read_header().await?.ok_or_else(|| {
        RpcError::from(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        ))
    })?;

    if !inner.pending.contains(header.seq) {
        tracing::debug!("Discarding response for unknown call {}", header.seq);
        return reader.discard_body().await;
    }

    if header.is_error() {
        reader.discard_body().await?;
        if let Some(call) = inner.pending.remove(header.seq) {
            call.fail(RpcError::Application(header.error));
        }
        return Ok(());
    }

    let body = match reader.read_body().await {
        Err(e) if e.is_connection_fatal() => return Err(e),
        body => body,
    };
    if let Some(mut call) = inner.pending.remove(header.seq) {
        match body {
            Ok(reply) => {
                call.reply = Some(reply);
                call.finish();
            }
            Err(e) => call.fail(e),
        }
    }
    Ok(())
}
