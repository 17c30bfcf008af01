use crate::buffer::FrameBuffer;
use crate::net::Network;
use crate::types::{msg, SYNC};
use std::time::Duration;

/// Keep-alive emitted whenever the queue stays empty for a full timeout.
const KEEP_ALIVE: [u8; 2] = [SYNC, msg::KEEP_ALIVE];

/// Relay pipeline: dequeue and transmit.
///
/// A frame that could not be transmitted goes back to the queue head, so
/// it is the first one out on the next session. Without history the whole
/// backlog is dropped when a session comes up, the requeued head included.
pub fn mainloop(buffer: &FrameBuffer, net: &Network, timeout: Duration) {
    loop {
        // synchronize with the network mainloop
        if !net.wait_connected() {
            return;
        }

        buffer.flush_unless_history();

        loop {
            match buffer.get_frame_timeout(timeout) {
                None => {
                    if !net.send(&KEEP_ALIVE) {
                        break;
                    }
                }
                Some(frame) => {
                    if net.send(frame.frame.bytes()) {
                        buffer.release_frame(frame);
                    } else {
                        buffer.put_frame(frame);
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferConfig;
    use crate::ctl::Shutdown;
    use crate::net::NetworkConfig;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::thread;
    use vane::logging;

    fn online_net() -> (Arc<Network>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let net = Arc::new(Network::new(
            NetworkConfig {
                host: "127.0.0.1".to_owned(),
                port: 0,
                reconnect_interval: 1,
            },
            Arc::new(Shutdown::new()),
            &logging::null(),
        ));

        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        net.install(Arc::new(client));
        (net, server)
    }

    fn buffer(history: bool) -> Arc<FrameBuffer> {
        Arc::new(FrameBuffer::new(
            &BufferConfig {
                static_backlog: 8,
                history,
                ..BufferConfig::default()
            },
            &logging::null(),
        ))
    }

    fn commit(buffer: &FrameBuffer, payload: &[u8]) {
        let mut frame = buffer.new_frame();
        frame.frame.raw[..payload.len()].copy_from_slice(payload);
        frame.frame.len = payload.len();
        buffer.commit_frame(frame);
    }

    #[test]
    fn test_frames_relayed_in_commit_order() {
        let (net, mut server) = online_net();
        let buffer = buffer(true);

        commit(&buffer, b"one");
        commit(&buffer, b"two");

        let relay = {
            let net = net.clone();
            let buffer = buffer.clone();
            thread::spawn(move || mainloop(&buffer, &net, Duration::from_millis(100)))
        };

        let mut wire = [0u8; 6];
        server.read_exact(&mut wire).unwrap();
        assert_eq!(&wire, b"onetwo");

        net.stop();
        relay.join().unwrap();

        // transmitted frames were released back to the pool
        let stats = buffer.statistics();
        assert_eq!(stats.queue_size, 0);
        assert_eq!(stats.pool_size, 8);
    }

    #[test]
    fn test_keepalive_on_idle() {
        let (net, mut server) = online_net();
        let buffer = buffer(true);

        let relay = {
            let net = net.clone();
            let buffer = buffer.clone();
            thread::spawn(move || mainloop(&buffer, &net, Duration::from_millis(10)))
        };

        let mut wire = [0u8; 2];
        server.read_exact(&mut wire).unwrap();
        assert_eq!(&wire, &[0x1a, b'6']);

        net.stop();
        relay.join().unwrap();
    }

    #[test]
    fn test_backlog_flushed_without_history() {
        let (net, mut server) = online_net();
        let buffer = buffer(false);

        // stale backlog from before the connection came up
        commit(&buffer, b"stale");

        let relay = {
            let net = net.clone();
            let buffer = buffer.clone();
            thread::spawn(move || mainloop(&buffer, &net, Duration::from_millis(10)))
        };

        // the backlog is dropped; the first transmission is a keep-alive
        let mut wire = [0u8; 2];
        server.read_exact(&mut wire).unwrap();
        assert_eq!(&wire, &[0x1a, b'6']);

        net.stop();
        relay.join().unwrap();

        assert_eq!(buffer.statistics().flushes, 1);
    }
}
