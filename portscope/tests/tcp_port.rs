use crossbeam::channel;
use portscope::channel::{ByteSource, ChannelBuffer, PortSource};
use portscope::port::{Port, RecvError};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("tcp://{}", listener.local_addr().unwrap());
    (listener, url)
}

#[test]
fn port_receives_sends_and_reports_disconnect() {
    let (listener, url) = listener();
    let (tx, rx) = channel::unbounded();
    let port = Port::new(&url, move |res: Result<Vec<u8>, RecvError>| {
        let _ = tx.send(res);
        Ok(())
    })
    .unwrap();
    let (mut peer, _) = listener.accept().unwrap();

    peer.write_all(b"hello\n").unwrap();
    let mut received = Vec::new();
    let deadline = Instant::now() + TIMEOUT;
    while received != b"hello\n" {
        match rx.recv_deadline(deadline).unwrap() {
            Ok(data) => received.extend_from_slice(&data),
            Err(RecvError::NotReady) | Err(RecvError::IO(_)) => {}
            Err(RecvError::Disconnected) => panic!("disconnected early"),
        }
    }

    port.send(b"AT\r\n".to_vec()).unwrap();
    peer.set_read_timeout(Some(TIMEOUT)).unwrap();
    let mut buf = [0u8; 4];
    peer.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"AT\r\n");

    drop(peer);
    loop {
        if let Err(RecvError::Disconnected) = rx.recv_deadline(deadline).unwrap() {
            break;
        }
    }
}

#[test]
fn port_source_fills_a_channel_buffer() {
    let (listener, url) = listener();
    let buffer = ChannelBuffer::new();
    let mut source = PortSource::new(&url, buffer.clone());
    assert!(!source.is_open());
    source.open().unwrap();
    assert!(source.is_open());
    let (mut peer, _) = listener.accept().unwrap();

    peer.write_all(b"status OK\r\n").unwrap();
    let deadline = Instant::now() + TIMEOUT;
    let mut drained = Vec::new();
    while drained != b"status OK\r\n" {
        assert!(Instant::now() < deadline, "no data");
        drained.extend(buffer.drain());
        std::thread::sleep(Duration::from_millis(5));
    }

    drop(peer);
    while !buffer.take_disconnected() {
        assert!(Instant::now() < deadline, "no disconnect");
        std::thread::sleep(Duration::from_millis(5));
    }
    source.close();
    assert!(!source.is_open());
    assert!(source.send(b"x").is_err());
}
