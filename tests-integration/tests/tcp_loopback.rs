//! End-to-end OpenFlow-framed exchange over a real TCP loopback
//! connection, driven entirely through the public `vconn` API.

use std::time::{Duration, Instant};

use ofp_transport::config::TransportConfig;
use ofp_transport::vconn::{open, Vconn, Want};
use ofp_transport::Buffer;

fn retry_until<T>(mut f: impl FnMut() -> ofp_transport::Result<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match f() {
            Ok(v) => return v,
            Err(e) if e.would_block() => {
                assert!(Instant::now() < deadline, "timed out waiting for readiness");
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}

fn ofp_header(length: u16) -> [u8; 8] {
    let mut h = [0u8; 8];
    h[0] = 4;
    h[1] = 0;
    h[2..4].copy_from_slice(&length.to_be_bytes());
    h
}

#[test]
fn client_and_server_exchange_one_frame_over_real_tcp() {
    let config = TransportConfig::default();

    // `ptcp:0` means "pick the default port" per the url grammar, so we
    // can't discover the bound port through a vconn handle alone; bind to
    // an OS-assigned port directly via a plain listener first, then reopen
    // it as a passive vconn on that same port.
    let raw_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = raw_listener.local_addr().unwrap().port();
    drop(raw_listener);

    let mut listener = open(&format!("ptcp:{port}"), &config).expect("passive vconn should bind chosen port");

    let mut client = open(&format!("tcp:127.0.0.1:{port}"), &config).expect("active vconn should connect");

    let mut server = retry_until(|| listener.accept());

    let mut payload = ofp_header(12).to_vec();
    payload.extend_from_slice(b"hello ofp!!!");
    let mut out = Buffer::new(payload.len());
    out.put(&payload);
    client.send(out).unwrap();

    let received = retry_until(|| {
        client.postpoll(ofp_transport::vconn::Revents::POLLOUT)?;
        server.recv()
    });

    assert_eq!(received.payload(), payload.as_slice());

    let want = Want::RECV;
    let pre = client.prepoll(want).unwrap();
    assert!(!pre.already_ready);
}
