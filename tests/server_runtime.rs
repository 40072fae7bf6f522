//! Server lifecycle behaviour over real connections.

mod common;

use common::{TestClient, TestServer};
use framelink::protocol::{CompressionFeatures, Handle};

fn all_features() -> CompressionFeatures {
    CompressionFeatures {
        lossy_color: true,
        lossless_depth: true,
    }
}

#[tokio::test]
async fn listening_resumes_after_a_session_closes() {
    let server = TestServer::start().await;

    {
        let mut first = TestClient::connect(server.addr).await;
        let (handle, _) = first.new_device("default", all_features()).await;
        assert_eq!(handle, Handle(1));
    }

    // The first connection is gone; a new peer gets a fresh session with
    // its own handle space.
    let mut second = TestClient::connect(server.addr).await;
    let (handle, _) = second.new_device("default", all_features()).await;
    assert_eq!(handle, Handle(1));

    drop(second);
    server.shutdown().await;
}

#[tokio::test]
async fn a_malformed_stream_only_ends_its_own_session() {
    let server = TestServer::start().await;

    {
        // Truncated body: NewObject with four bytes aborts that session.
        let mut broken = TestClient::connect(server.addr).await;
        broken
            .send_raw(framelink::protocol::MessageType::NewObject as u32, &[1, 0, 0, 0])
            .await;
    }

    let mut client = TestClient::connect(server.addr).await;
    let (handle, _) = client.new_device("default", all_features()).await;
    assert_eq!(handle, Handle(1));

    drop(client);
    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_completes_with_no_active_sessions() {
    let server = TestServer::start().await;
    server.shutdown().await;
}
