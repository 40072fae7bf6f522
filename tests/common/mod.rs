//! Shared harness for integration tests: a minimal wire client plus a
//! helper that runs a server on an ephemeral port with a shared
//! reference backend.

// Each test binary uses a subset of the harness.
#![allow(dead_code)]

use std::net::SocketAddr;

use framelink::{
    backend::ReferenceBackend,
    protocol::{CompressionFeatures, DataType, Handle, MessageType},
    server::BridgeServer,
    wire::{Reader, Writer},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    task::JoinHandle,
};

/// A running server bound to an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub backend: ReferenceBackend,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Start a server whose sessions share one reference backend, so
    /// tests can inspect what the session did.
    pub async fn start() -> Self {
        let backend = ReferenceBackend::new();
        let factory = {
            let backend = backend.clone();
            move || backend.clone()
        };
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = BridgeServer::new(factory)
            .ready_signal(ready_tx)
            .bind("127.0.0.1:0".parse().expect("loopback addr"))
            .expect("bind ephemeral port");
        let addr = server.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            server
                .run_with_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await
                .expect("server run");
        });
        ready_rx.await.expect("server readiness");
        Self {
            addr,
            backend,
            stop: Some(stop_tx),
            task,
        }
    }

    /// Signal shutdown and wait for the server to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.expect("server join");
    }
}

/// Minimal wire client speaking the framed bridge protocol.
pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self { stream }
    }

    pub async fn send(&mut self, kind: MessageType, body: Writer) {
        self.send_raw(kind as u32, &body.freeze()).await;
    }

    pub async fn send_raw(&mut self, kind: u32, payload: &[u8]) {
        let mut frame = Vec::with_capacity(8 + payload.len());
        frame.extend_from_slice(&kind.to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).await.expect("write frame");
    }

    /// Read one framed response.
    pub async fn recv(&mut self) -> (u32, Vec<u8>) {
        let mut header = [0u8; 8];
        self.stream.read_exact(&mut header).await.expect("read header");
        let kind = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let mut payload = vec![0u8; len as usize];
        self.stream.read_exact(&mut payload).await.expect("read payload");
        (kind, payload)
    }

    /// Read one response and assert its type tag.
    pub async fn recv_expect(&mut self, expected: MessageType) -> Vec<u8> {
        let (kind, payload) = self.recv().await;
        assert_eq!(kind, expected as u32, "unexpected response type");
        payload
    }

    /// Perform the handshake and return the assigned device handle and
    /// the server's advertised compression features.
    pub async fn new_device(
        &mut self,
        subtype: &str,
        features: CompressionFeatures,
    ) -> (Handle, CompressionFeatures) {
        let mut body = Writer::new();
        body.write_string(subtype);
        features.write(&mut body);
        self.send(MessageType::NewDevice, body).await;

        let payload = self.recv_expect(MessageType::DeviceHandle).await;
        let mut reader = Reader::new(&payload);
        let handle = Handle::read(&mut reader).expect("device handle");
        let server = CompressionFeatures::read(&mut reader).expect("server features");
        (handle, server)
    }

    pub async fn new_object(
        &mut self,
        device: Handle,
        kind: DataType,
        subtype: &str,
        object: Handle,
    ) {
        let mut body = Writer::new();
        device.write(&mut body);
        kind.write(&mut body);
        body.write_string(subtype);
        object.write(&mut body);
        self.send(MessageType::NewObject, body).await;
    }

    pub async fn set_param(
        &mut self,
        device: Handle,
        object: Handle,
        name: &str,
        kind: DataType,
        value: &[u8],
    ) {
        let mut body = Writer::new();
        device.write(&mut body);
        object.write(&mut body);
        body.write_string(name);
        kind.write(&mut body);
        body.write_bytes(value);
        self.send(MessageType::SetParam, body).await;
    }

    pub async fn commit_object(&mut self, device: Handle, object: Handle) {
        let mut body = Writer::new();
        device.write(&mut body);
        object.write(&mut body);
        self.send(MessageType::CommitParams, body).await;
    }
}
