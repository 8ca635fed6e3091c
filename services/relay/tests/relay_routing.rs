
use std::time::Duration;

use harness::{http_request, send_and_drain, RelayHandle, TcpEchoBackend, TlsBackend};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);
const ALLOW_ALL: &str = "0.0.0.0/0,::/0";

#[tokio::test]
async fn tls_passthrough_by_sni_reaches_tls_backend() {
    let plain = TcpEchoBackend::spawn().await.unwrap();
    let tls = TlsBackend::spawn("a.example.test", "TLS-A").await.unwrap();
    let relay = RelayHandle::spawn(&[plain.addr, tls.addr], ALLOW_ALL, "*.example.test")
        .await
        .unwrap();

    let reply = timeout(TEST_TIMEOUT, async {
        let mut stream =
            harness::tls_client_connect(relay.listen_addr, "a.example.test", &tls.cert_der)
                .await?;
        stream.write_all(b"whoami").await?;
        stream.flush().await?;

        let mut buf = vec![0u8; 16];
        let n = stream.read(&mut buf).await?;
        Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf[..n]).to_string())
    })
    .await
    .expect("timed out")
    .expect("TLS exchange through relay failed");

    assert_eq!(reply, "TLS-A");
    assert_eq!(tls.connection_count(), 1);
    assert_eq!(plain.connection_count(), 0);
    assert!(relay.wait_idle().await);
}

#[tokio::test]
async fn tls_without_sni_is_denied_under_domain_filter() {
    let plain = TcpEchoBackend::spawn().await.unwrap();
    let tls = TlsBackend::spawn("a.example.test", "TLS-A").await.unwrap();
    let relay = RelayHandle::spawn(&[plain.addr, tls.addr], ALLOW_ALL, "*.example.test")
        .await
        .unwrap();

    // An IP server name is never sent as SNI.
    let result = timeout(
        TEST_TIMEOUT,
        harness::tls_client_connect(relay.listen_addr, "127.0.0.1", &tls.cert_der),
    )
    .await
    .expect("timed out");

    assert!(result.is_err());
    assert_eq!(tls.connection_count(), 0);
    assert_eq!(plain.connection_count(), 0);
}

#[tokio::test]
async fn http_host_routes_to_plaintext_backend() {
    let plain = TcpEchoBackend::spawn().await.unwrap();
    let tls = TlsBackend::spawn("a.example.test", "TLS-A").await.unwrap();
    let relay = RelayHandle::spawn(&[plain.addr, tls.addr], ALLOW_ALL, "*.example.test")
        .await
        .unwrap();

    let request = http_request("api.example.test:8080", b"hello backend");
    let reply = timeout(TEST_TIMEOUT, send_and_drain(relay.listen_addr, &request))
        .await
        .expect("timed out")
        .unwrap();

    assert_eq!(reply, request);
    assert_eq!(plain.connection_count(), 1);
    assert_eq!(tls.connection_count(), 0);
}

#[tokio::test]
async fn denied_domain_never_reaches_a_backend() {
    let plain = TcpEchoBackend::spawn().await.unwrap();
    let tls = TlsBackend::spawn("a.example.test", "TLS-A").await.unwrap();
    let relay = RelayHandle::spawn(&[plain.addr, tls.addr], ALLOW_ALL, "*.example.test")
        .await
        .unwrap();

    let request = http_request("example.test.evil.test", b"");
    let reply = timeout(TEST_TIMEOUT, send_and_drain(relay.listen_addr, &request))
        .await
        .expect("timed out")
        .unwrap();

    assert!(reply.is_empty());
    assert_eq!(plain.connection_count(), 0);
    assert_eq!(tls.connection_count(), 0);
    assert!(relay.wait_idle().await);
}

#[tokio::test]
async fn denied_ip_never_reaches_a_backend() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let relay = RelayHandle::spawn(&[backend.addr], "10.0.0.0/8,fd00::/8", "*")
        .await
        .unwrap();

    let request = http_request("anything.test", b"data");
    let reply = timeout(TEST_TIMEOUT, send_and_drain(relay.listen_addr, &request))
        .await
        .expect("timed out")
        .unwrap();

    assert!(reply.is_empty());
    assert_eq!(backend.connection_count(), 0);
    assert_eq!(relay.active.get(), 0);
}

#[tokio::test]
async fn half_close_relays_every_byte_both_ways() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let relay = RelayHandle::spawn(&[backend.addr], ALLOW_ALL, "*")
        .await
        .unwrap();

    let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let request = http_request("bulk.test", &body);

    let reply = timeout(TEST_TIMEOUT, send_and_drain(relay.listen_addr, &request))
        .await
        .expect("timed out")
        .unwrap();

    assert_eq!(reply.len(), request.len());
    assert_eq!(reply, request);
    assert_eq!(
        backend
            .bytes_received
            .load(std::sync::atomic::Ordering::Relaxed),
        request.len() as u64
    );
    assert!(relay.wait_idle().await, "active connection count did not return to zero");
}

#[tokio::test]
async fn wildcard_policy_spreads_connections_over_backends() {
    let backends = [
        TcpEchoBackend::spawn().await.unwrap(),
        TcpEchoBackend::spawn().await.unwrap(),
        TcpEchoBackend::spawn().await.unwrap(),
    ];
    let addrs: Vec<_> = backends.iter().map(|b| b.addr).collect();
    let relay = RelayHandle::spawn(&addrs, ALLOW_ALL, "*").await.unwrap();

    let request = http_request("spread.test", b"x");
    for _ in 0..60 {
        let reply = timeout(TEST_TIMEOUT, send_and_drain(relay.listen_addr, &request))
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(reply, request);
    }

    for backend in &backends {
        assert!(
            backend.connection_count() > 0,
            "backend {} never selected",
            backend.addr
        );
    }
    let total: u64 = backends.iter().map(|b| b.connection_count()).sum();
    assert_eq!(total, 60);
    assert!(relay.wait_idle().await);
}
