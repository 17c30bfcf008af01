use crate::filter::Filter;
use crate::net::Network;
use crate::serial::SerialStore;
use byteorder::{BigEndian, ByteOrder};
use hashbrown::HashMap;
use std::sync::Arc;
use vane::logging::{self, Logger};

/// Maximal control packet length, including the 4 byte header.
const MAX_PACKET_LEN: usize = 128;
/// Header: packet type and length, both u16 big endian.
const HEADER_LEN: usize = 4;

/// Well-known control packet types.
pub mod packet_type {
    /// Start a reverse shell (platform dependent)
    pub const REVERSE_SHELL: u16 = 0;
    /// Restart the daemon (platform dependent)
    pub const RESTART: u16 = 1;
    /// Reboot the system (platform dependent)
    pub const REBOOT: u16 = 2;
    /// Upgrade and restart (platform dependent)
    pub const UPGRADE: u16 = 3;
    /// Reconfigure the frame filter
    pub const FILTER: u16 = 4;
    /// Serial number response
    pub const SERIAL_RESPONSE: u16 = 5;
}

struct Processor {
    payload_len: usize,
    handler: Box<dyn Fn(&[u8]) + Send + Sync>,
}

/// Talkback channel: the downlink control path from the server.
///
/// Control packets are length prefixed, not byte stuffed; this is a
/// second framing on the same TCP stream and must not be unified with the
/// uplink codec. Packets dispatch to registered processors by type; any
/// framing violation resets the read buffer.
pub struct Talkback {
    processors: HashMap<u16, Processor>,
    log: Logger,
}

impl Talkback {
    pub fn new(log: &Logger) -> Talkback {
        Talkback {
            processors: HashMap::new(),
            log: log.new(logging::o!()),
        }
    }

    /// Registers a processor for a packet type.
    pub fn register<F: Fn(&[u8]) + Send + Sync + 'static>(
        &mut self,
        packet_type: u16,
        payload_len: usize,
        handler: F,
    ) {
        let replaced = self.processors.insert(
            packet_type,
            Processor {
                payload_len,
                handler: Box::new(handler),
            },
        );
        assert!(replaced.is_none(), "processor registered twice");
    }

    /// Registers the frame filter reconfiguration processor.
    pub fn register_filter(&mut self, filter: Arc<Filter>) {
        const SYNC_ONLY: u8 = 1 << 0;
        const EXT_SQUITTER_ONLY: u8 = 1 << 1;
        const RESET_SYNC: u8 = 1 << 7;

        let log = self.log.new(logging::o!());

        self.register(packet_type::FILTER, 2, move |payload| {
            let mask = payload[0];
            let cfg = payload[1];

            if mask & SYNC_ONLY != 0 {
                let enable = cfg & SYNC_ONLY != 0;
                logging::info!(log, "setting sync filter"; "enable" => enable);
                filter.set_sync_filter(enable);
            }

            if mask & EXT_SQUITTER_ONLY != 0 {
                let enable = cfg & EXT_SQUITTER_ONLY != 0;
                logging::info!(log, "setting ext squitter only filter";
                               "enable" => enable);
                filter.set_ext_squitter_only(enable);
            }

            if mask & RESET_SYNC != 0 {
                filter.reset();
            }
        });
    }

    /// Registers the serial number response processor.
    pub fn register_serial(&mut self, serial: Arc<SerialStore>) {
        self.register(packet_type::SERIAL_RESPONSE, 4, move |payload| {
            serial.fulfill(BigEndian::read_u32(payload));
        });
    }

    /// Mainloop: reads control packets off the network and dispatches them.
    pub fn mainloop(&self, net: &Network) {
        let mut buf = [0u8; MAX_PACKET_LEN];

        loop {
            // synchronize with the network; a new connection starts with an
            // empty buffer
            if !net.wait_connected() {
                return;
            }

            let mut len = 0;
            loop {
                len = self.drain(&mut buf, len);

                let count = net.receive(&mut buf[len..]);
                if count == 0 {
                    break;
                }
                len += count;
            }
        }
    }

    /// Dispatches every complete packet in the buffer, compacting it.
    /// Returns the remaining length; a framing violation empties the buffer.
    fn drain(&self, buf: &mut [u8; MAX_PACKET_LEN], mut len: usize) -> usize {
        while len >= HEADER_LEN {
            let packet_type = BigEndian::read_u16(&buf[..2]);
            let packet_len = BigEndian::read_u16(&buf[2..4]) as usize;

            if packet_len < HEADER_LEN || packet_len > MAX_PACKET_LEN {
                logging::warn!(self.log, "wrong packet format, resetting buffer";
                               "packet_type" => packet_type,
                               "packet_len" => packet_len);
                return 0;
            }

            if len < packet_len {
                // incomplete, more data needed
                break;
            }

            self.process(packet_type, &buf[HEADER_LEN..packet_len]);

            buf.copy_within(packet_len..len, 0);
            len -= packet_len;
        }

        len
    }

    /// Calls the processor for one packet, if any.
    fn process(&self, packet_type: u16, payload: &[u8]) {
        let processor = match self.processors.get(&packet_type) {
            Some(processor) => processor,
            None => {
                logging::warn!(self.log, "unknown packet type";
                               "packet_type" => packet_type,
                               "payload_len" => payload.len());
                return;
            }
        };

        if payload.len() != processor.payload_len {
            logging::warn!(self.log, "packet size mismatch, discarding";
                           "packet_type" => packet_type,
                           "payload_len" => payload.len(),
                           "expected" => processor.payload_len);
            return;
        }

        (processor.handler)(payload);
    }
}
