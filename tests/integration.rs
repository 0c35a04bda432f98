//! Integration tests for seqwire.
//!
//! These tests run a real client against a real server over in-memory,
//! TCP and Unix socket transports.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{duplex, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::sync::{mpsc, watch};

use seqwire::codec::{Codec, CodecRegistry, JsonCodec, MsgPackCodec};
use seqwire::protocol::{build_frame, write_handshake, FrameReader, Handshake, Header, MAGIC_NUMBER};
use seqwire::{Client, RpcError, Server};

const GUARD: Duration = Duration::from_secs(10);

fn echo_server() -> Server {
    Server::builder()
        .handle("Svc.Echo", |msg: Value, _ctx| async move { Ok(msg) })
        .handle("Svc.Sleep", |ms: u64, _ctx| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ms)
        })
        .handle("Svc.Fail", |msg: String, _ctx| async move {
            Err::<(), _>(RpcError::application(msg))
        })
        .build()
        .unwrap()
}

/// Poll `condition` until it holds, failing the test after [`GUARD`].
async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(GUARD, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

/// Connect a client to `server` over an in-memory stream.
async fn connect(server: Server, builder: seqwire::ClientBuilder) -> Client {
    let (client_io, server_io) = duplex(64 * 1024);
    tokio::spawn(async move { server.serve_conn(server_io).await });
    builder.connect(client_io).await.unwrap()
}

#[tokio::test]
async fn test_echo_round_trip() {
    let client = connect(echo_server(), Client::builder()).await;

    let reply: String = client.call("Svc.Echo", "x").await.unwrap();
    assert_eq!(reply, "x");
    assert_eq!(client.pending_calls(), 0);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_reverse_completion_matched_by_seq() {
    let progress = Arc::new(watch::channel(0usize).0);
    let finished = Arc::new(Mutex::new(Vec::new()));

    let server = {
        let progress = progress.clone();
        let finished = finished.clone();
        Server::builder()
            .handle("Svc.Ordered", move |k: usize, _ctx| {
                let progress = progress.clone();
                let finished = finished.clone();
                async move {
                    // call k finishes only after every call above it
                    let mut rx = progress.subscribe();
                    rx.wait_for(|done| *done == 5 - k)
                        .await
                        .map_err(|_| RpcError::application("progress channel closed"))?;
                    finished.lock().unwrap().push(k);
                    progress.send_modify(|done| *done += 1);
                    Ok::<_, RpcError>(k * 10)
                }
            })
            .build()
            .unwrap()
    };
    let client = connect(server, Client::builder()).await;

    let (done, mut completed) = mpsc::channel(5);
    for k in 1..=5usize {
        let seq = client.go("Svc.Ordered", &k, done.clone()).await;
        assert_eq!(seq, k as u64);
    }

    let mut resolved = Vec::new();
    for _ in 0..5 {
        let call = tokio::time::timeout(GUARD, completed.recv()).await.unwrap().unwrap();
        let k = call.args.as_u64().unwrap();
        assert_eq!(call.seq, k);
        assert_eq!(call.reply::<u64>().unwrap(), k * 10);
        resolved.push(k);
    }
    resolved.sort();

    assert_eq!(resolved, vec![1, 2, 3, 4, 5]);
    assert_eq!(*finished.lock().unwrap(), vec![5, 4, 3, 2, 1]);
    assert!(completed.try_recv().is_err());
}

#[tokio::test]
async fn test_concurrent_calls_resolve_exactly_once() {
    let client = Arc::new(connect(echo_server(), Client::builder()).await);

    let mut tasks = Vec::new();
    for i in 0..200u64 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let reply: u64 = client.call("Svc.Echo", &i).await.unwrap();
            assert_eq!(reply, i);
        }));
    }
    for task in tasks {
        tokio::time::timeout(GUARD, task).await.unwrap().unwrap();
    }

    assert_eq!(client.pending_calls(), 0);
    assert!(client.is_available());
}

#[tokio::test]
async fn test_errors_are_call_scoped() {
    let client = connect(echo_server(), Client::builder()).await;

    let err = client.call::<_, ()>("Svc.Fail", "boom").await.unwrap_err();
    assert!(matches!(err, RpcError::Application(ref msg) if msg == "boom"));

    let err = client.call::<_, ()>("Svc.Missing", &()).await.unwrap_err();
    assert_eq!(err.to_string(), "rpc server: can't find method Missing");

    let err = client.call::<_, ()>("NoDot", &()).await.unwrap_err();
    assert!(err.to_string().contains("ill-formed"));

    // wrong argument type for the handler
    let err = client.call::<_, u64>("Svc.Sleep", "soon").await.unwrap_err();
    assert!(err.to_string().contains("invalid arguments"));

    let reply: String = client.call("Svc.Echo", "still fine").await.unwrap();
    assert_eq!(reply, "still fine");
}

#[tokio::test]
async fn test_close_resolves_pending_with_shutdown() {
    let client = connect(echo_server(), Client::builder()).await;
    let (done, mut completed) = mpsc::channel(3);

    for _ in 0..3 {
        client.go("Svc.Sleep", &60_000u64, done.clone()).await;
    }
    assert_eq!(client.pending_calls(), 3);

    client.close().await.unwrap();

    for _ in 0..3 {
        let call = completed.try_recv().unwrap();
        assert!(matches!(call.error, Some(RpcError::Shutdown)));
    }
    let err = client.call::<_, String>("Svc.Echo", "late").await.unwrap_err();
    assert!(matches!(err, RpcError::Shutdown));
}

#[tokio::test]
async fn test_call_timeout_then_late_response() {
    let client = connect(echo_server(), Client::builder()).await;

    let err = client
        .call_timeout::<_, u64>("Svc.Sleep", &50u64, Duration::from_millis(5))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout(_)));

    // the late response is consumed without disturbing later calls
    let reply: u64 = client.call("Svc.Sleep", &0u64).await.unwrap();
    assert_eq!(reply, 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_json_codec_end_to_end() {
    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    let server = Server::builder()
        .handle("Geo.Flip", |p: Point, _ctx| async move { Ok(Point { x: p.y, y: p.x }) })
        .build()
        .unwrap();
    let client = connect(server, Client::builder().codec(Arc::new(JsonCodec))).await;

    let flipped: Point = client.call("Geo.Flip", &Point { x: 1, y: 2 }).await.unwrap();
    assert_eq!(flipped, Point { x: 2, y: 1 });
}

#[tokio::test]
async fn test_wrong_magic_aborts_connection() {
    let (mut client_io, server_io) = duplex(64 * 1024);
    let server = tokio::spawn(async move { echo_server().serve_conn(server_io).await });

    let bad = Handshake {
        magic_number: MAGIC_NUMBER ^ 1,
        codec_type: seqwire::codec::MSGPACK_TYPE.to_string(),
    };
    write_handshake(&mut client_io, &bad).await.unwrap();

    let codec: Arc<dyn Codec> = Arc::new(MsgPackCodec);
    let header = codec
        .encode(&serde_json::to_value(Header::new("Svc.Echo", 1)).unwrap())
        .unwrap();
    let frame = build_frame(&header, &codec.encode(&json!("x")).unwrap());
    // the server may already be gone, so the write result is not checked
    let _ = client_io.write_all(&frame).await;

    let err = tokio::time::timeout(GUARD, server).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, RpcError::Handshake(_)));

    let mut reader = FrameReader::new(client_io, codec);
    assert!(reader.read_header().await.unwrap().is_none());
}

#[tokio::test]
async fn test_unsupported_codec_fails_client_calls() {
    let mut codecs = CodecRegistry::new();
    codecs.register(Arc::new(MsgPackCodec));
    let server = Server::builder()
        .handle("Svc.Echo", |msg: String, _ctx| async move { Ok(msg) })
        .codecs(codecs)
        .build()
        .unwrap();

    let client = connect(server, Client::builder().codec(Arc::new(JsonCodec))).await;

    let err = tokio::time::timeout(GUARD, client.call::<_, String>("Svc.Echo", "x"))
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.is_connection_fatal(), "unexpected error: {}", err);
    wait_until(|| !client.is_available()).await;
}

/// Stream wrapper that records every byte written through it.
struct Capture<S> {
    inner: S,
    written: Arc<Mutex<Vec<u8>>>,
}

impl<S: AsyncRead + Unpin> AsyncRead for Capture<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Capture<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            self.written.lock().unwrap().extend_from_slice(&buf[..*n]);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[tokio::test]
async fn test_concurrent_responses_never_interleave() {
    const CALLS: u64 = 24;
    const REPLY_LEN: usize = 16 * 1024;

    let server = Server::builder()
        .handle("Svc.Fill", |k: u64, _ctx| async move {
            // stagger completions so several handlers finish together
            tokio::time::sleep(Duration::from_millis(k % 3)).await;
            let c = char::from(b'a' + (k % 26) as u8);
            Ok(std::iter::repeat(c).take(REPLY_LEN).collect::<String>())
        })
        .build()
        .unwrap();

    // a small pipe forces every response into many partial writes
    let (client_io, server_io) = duplex(512);
    let written = Arc::new(Mutex::new(Vec::new()));
    let capture = Capture {
        inner: server_io,
        written: written.clone(),
    };
    let serving = tokio::spawn(async move { server.serve_conn(capture).await });

    let client = Arc::new(Client::builder().connect(client_io).await.unwrap());
    let mut tasks = Vec::new();
    for k in 0..CALLS {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let reply: String = client.call("Svc.Fill", &k).await.unwrap();
            (k, reply)
        }));
    }
    for task in tasks {
        let (k, reply) = tokio::time::timeout(GUARD, task).await.unwrap().unwrap();
        let c = char::from(b'a' + (k % 26) as u8);
        assert_eq!(reply.len(), REPLY_LEN);
        assert!(reply.chars().all(|r| r == c));
    }

    client.close().await.unwrap();
    tokio::time::timeout(GUARD, serving).await.unwrap().unwrap().unwrap();

    // every captured response is a complete, contiguous frame
    let captured = written.lock().unwrap().clone();
    let codec: Arc<dyn Codec> = Arc::new(MsgPackCodec);
    let mut reader = FrameReader::new(BufReader::new(captured.as_slice()), codec);
    let mut seen = Vec::new();
    while let Some(header) = reader.read_header().await.unwrap() {
        let body: String = serde_json::from_value(reader.read_body().await.unwrap()).unwrap();
        let k = header.seq - 1;
        let c = char::from(b'a' + (k % 26) as u8);
        assert!(body.chars().all(|r| r == c), "frame {} is interleaved", header.seq);
        seen.push(header.seq);
    }
    seen.sort();
    assert_eq!(seen, (1..=CALLS).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_tcp_serve_and_dial() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move { echo_server().serve(listener).await });

    let first = Client::builder().dial(addr).await.unwrap();
    let second = Client::builder()
        .codec(Arc::new(JsonCodec))
        .dial(addr)
        .await
        .unwrap();

    let a: String = first.call("Svc.Echo", "one").await.unwrap();
    let b: String = second.call("Svc.Echo", "two").await.unwrap();
    assert_eq!((a.as_str(), b.as_str()), ("one", "two"));

    // closing one connection leaves the other serving
    first.close().await.unwrap();
    let b: String = second.call("Svc.Echo", "three").await.unwrap();
    assert_eq!(b, "three");

    second.close().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_dial_times_out() {
    // non-routable: the connect either hangs until the timeout or is refused
    let err = Client::builder()
        .connect_timeout(Duration::from_millis(50))
        .dial("10.255.255.1:9")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RpcError::Timeout(_) | RpcError::Io(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_serve() {
    use seqwire::transport::UnixSocketListener;

    let path = std::env::temp_dir().join(format!("seqwire-it-{}.sock", std::process::id()));
    let listener = UnixSocketListener::bind(&path).unwrap();
    let _cleanup = listener.cleanup_guard();
    let server = tokio::spawn(async move { echo_server().serve(listener).await });

    let stream = tokio::net::UnixStream::connect(&path).await.unwrap();
    let client = Client::builder().connect(stream).await.unwrap();

    let reply: Vec<u32> = client.call("Svc.Echo", &[1u32, 2, 3]).await.unwrap();
    assert_eq!(reply, vec![1, 2, 3]);

    client.close().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_server_rejects_oversized_frame() {
    let server = Server::builder()
        .handle("Svc.Echo", |msg: String, _ctx| async move { Ok(msg) })
        .max_frame_size(1024)
        .build()
        .unwrap();
    let client = connect(server, Client::builder()).await;

    let big = "x".repeat(4096);
    let err = tokio::time::timeout(GUARD, client.call::<_, String>("Svc.Echo", &big))
        .await
        .unwrap()
        .unwrap_err();
    // the header was read, so the server answers it before dropping the connection
    assert!(
        err.to_string().contains("exceeds maximum 1024") || err.is_connection_fatal(),
        "unexpected error: {}",
        err
    );

    wait_until(|| !client.is_available()).await;
}
