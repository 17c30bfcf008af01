use crate::buffer::FrameBuffer;
use crate::ctl::Shutdown;
use crate::filter::Filter;
use crate::input::Parser;
use crate::types::{DecodedFrame, FrameType};

/// Receive pipeline: parse, filter, commit.
///
/// Runs until the input driver refuses to reconnect, which only happens on
/// shutdown. A frame in flight when the input fails is returned to the
/// pool by the producer guard.
pub fn mainloop(parser: &mut Parser, buffer: &FrameBuffer, filter: &Filter, shutdown: &Shutdown) {
    let mut decoded = DecodedFrame::new();

    while !shutdown.is_set() {
        if !parser.connect() {
            return;
        }

        // a fresh input session must prove synchronization again
        filter.reset();

        let mut frame = buffer.new_frame();
        loop {
            if !parser.get_frame(&mut frame.frame, &mut decoded) {
                buffer.abort_frame(frame);
                parser.disconnect();
                break;
            }

            if decoded.frame_type == FrameType::Status && decoded.mlat != 0 {
                filter.set_synchronized(true);
            }

            if filter.filter(decoded.frame_type, decoded.payload[0]) {
                buffer.commit_frame(frame);
                frame = buffer.new_frame();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferConfig;
    use crate::filter::FilterConfig;
    use crate::input::{Driver, InputControl, InputStatistics};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use vane::logging;

    /// Driver that serves one scripted session, then refuses to reconnect.
    struct OneShotDriver {
        data: Mutex<Vec<u8>>,
        connected_once: AtomicBool,
    }

    impl OneShotDriver {
        fn new(data: Vec<u8>) -> OneShotDriver {
            OneShotDriver {
                data: Mutex::new(data),
                connected_once: AtomicBool::new(false),
            }
        }
    }

    impl Driver for OneShotDriver {
        fn connect(&self) -> bool {
            !self.connected_once.swap(true, Ordering::SeqCst)
        }

        fn disconnect(&self) {}

        fn read(&self, buf: &mut [u8]) -> usize {
            let mut data = self.data.lock().unwrap();
            let count = data.len().min(buf.len());
            buf[..count].copy_from_slice(&data[..count]);
            data.drain(..count);
            count
        }

        fn write(&self, _buf: &[u8]) -> usize {
            3
        }
    }

    fn status_frame(mlat: u8) -> Vec<u8> {
        let mut frame = vec![0x1a, 0x34, 0, 0, 0, 0, 0, mlat, 50];
        frame.extend_from_slice(&[0; 14]);
        frame
    }

    fn mode_s_long(first_payload: u8) -> Vec<u8> {
        let mut frame = vec![0x1a, 0x33, 0, 0, 0, 0, 0, 1, 50, first_payload];
        frame.extend_from_slice(&[0; 13]);
        frame
    }

    fn run_pipeline(stream: Vec<u8>, sync_filter: bool) -> (FrameBuffer, Arc<InputStatistics>) {
        let driver = Arc::new(OneShotDriver::new(stream));
        let filter_cfg = Arc::new(FilterConfig::new(true, true, sync_filter));
        let ctl = Arc::new(InputControl::new(
            driver,
            filter_cfg.clone(),
            true,
            &logging::null(),
        ));
        let stats = Arc::new(InputStatistics::default());
        let mut parser = Parser::new(ctl, stats.clone(), &logging::null());

        let buffer = FrameBuffer::new(
            &BufferConfig {
                static_backlog: 16,
                ..BufferConfig::default()
            },
            &logging::null(),
        );
        let filter = Filter::new(filter_cfg);
        let shutdown = Shutdown::new();

        mainloop(&mut parser, &buffer, &filter, &shutdown);
        (buffer, stats)
    }

    #[test]
    fn test_status_frame_opens_the_gate() {
        let mut stream = Vec::new();
        stream.extend(mode_s_long(17 << 3)); // unsynchronized yet, dropped
        stream.extend(status_frame(1)); // synchronizes, itself not forwarded
        stream.extend(mode_s_long(17 << 3)); // forwarded
        stream.extend(mode_s_long(18 << 3)); // forwarded

        let (buffer, _) = run_pipeline(stream, true);

        assert_eq!(buffer.statistics().queue_size, 2);

        let frame = buffer.get_frame_timeout(Duration::from_millis(5)).unwrap();
        assert_eq!(frame.frame.raw[1], 0x33);
        buffer.release_frame(frame);
    }

    #[test]
    fn test_status_frame_without_mlat_keeps_gate_closed() {
        let mut stream = Vec::new();
        stream.extend(status_frame(0));
        stream.extend(mode_s_long(17 << 3));

        let (buffer, _) = run_pipeline(stream, true);
        assert_eq!(buffer.statistics().queue_size, 0);
    }

    #[test]
    fn test_raw_bytes_are_committed() {
        let mut stream = Vec::new();
        let frame = mode_s_long(17 << 3);
        stream.extend(status_frame(1));
        stream.extend(frame.clone());

        let (buffer, _) = run_pipeline(stream, true);

        let committed = buffer.get_frame_timeout(Duration::from_millis(5)).unwrap();
        assert_eq!(committed.frame.bytes(), &frame[..]);
        buffer.release_frame(committed);
    }

    #[test]
    fn test_in_flight_frame_returned_on_input_loss() {
        let (buffer, _) = run_pipeline(Vec::new(), false);

        // all slots back in the pool, nothing committed
        let stats = buffer.statistics();
        assert_eq!(stats.queue_size, 0);
        assert_eq!(stats.pool_size, 16);
    }
}
