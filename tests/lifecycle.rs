//! Lifecycle Controller round-trip properties: start/stop are idempotent,
//! `local_port` reflects the running state, and a live client connection
//! is force-closed (not gracefully drained) on stop.

use std::time::Duration;

use base64::Engine;
use meek_client::config::{MeekConfig, MeekMode, RelayTarget};
use meek_client::MeekClient;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

fn config() -> MeekConfig {
    MeekConfig {
        mode: MeekMode::Unfronted,
        session_id: "lifecycle".into(),
        target_address: "upstream.example:443".into(),
        recipient_public_key_b64: base64::engine::general_purpose::STANDARD.encode([3u8; 32]),
        obfuscation_keyword: None,
        fronting_domain: None,
        fronting_host: None,
        // Nothing in these tests issues a real request, so an unroutable
        // relay target is fine.
        relay: Some(RelayTarget {
            host: "127.0.0.1".into(),
            port: 1,
        }),
    }
}

#[tokio::test]
async fn start_stop_is_idempotent_and_leaks_no_port() {
    let client = MeekClient::new(config()).unwrap();
    assert_eq!(client.local_port().await, -1);

    for _ in 0..3 {
        let port = client.start().await.unwrap();
        assert!(port > 0);
        assert_eq!(client.local_port().await as u16, port);
        client.stop().await;
        assert_eq!(client.local_port().await, -1);
    }

    // Stopping an already-stopped client is a no-op, not an error.
    client.stop().await;
    assert_eq!(client.local_port().await, -1);
}

#[tokio::test]
async fn stop_force_closes_a_live_connection() {
    let client = MeekClient::new(config()).unwrap();
    let port = client.start().await.unwrap();

    let mut app_side = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    // Give the acceptor a moment to register the connection before we
    // pull the rug out from under it.
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.stop().await;

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), app_side.read(&mut buf))
        .await
        .expect("forced close should surface promptly")
        .unwrap();
    assert_eq!(n, 0);
}
