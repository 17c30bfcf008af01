/// Byte value delimiting frames on the beast wire format. Inside a frame
/// body every occurrence is doubled.
pub const SYNC: u8 = 0x1a;

/// Maximal length of a username. Must match the server side.
pub const MAX_USERNAME: usize = 40;

/// Maximal length of a raw (still escaped) frame: sync + type byte plus
/// 7 header and 14 payload bytes, everything after the type potentially
/// doubled.
pub const MAX_RAW_LEN: usize = 23 * 2;

/// Uplink message type bytes of the extended beast protocol.
pub mod msg {
    /// Serial number
    pub const SERIAL: u8 = b'5';
    /// Keep alive
    pub const KEEP_ALIVE: u8 = b'6';
    /// GPS position
    pub const GPS_POSITION: u8 = b'7';
    /// Device ID and daemon version
    pub const DEVICE_ID: u8 = b'A';
    /// Serial number request
    pub const SERIAL_REQUEST: u8 = b'B';
    /// User name
    pub const USER: u8 = b'C';
}

/// Receiver frame types, as transmitted in the wire type byte.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameType {
    ModeAc = 0,
    ModeSShort = 1,
    ModeSLong = 2,
    Status = 3,
}

impl FrameType {
    /// Maps a wire type byte to the frame type. Unknown bytes force a
    /// resynchronization upstream.
    #[inline]
    pub fn from_wire(ch: u8) -> Option<FrameType> {
        match ch {
            b'1' => Some(FrameType::ModeAc),
            b'2' => Some(FrameType::ModeSShort),
            b'3' => Some(FrameType::ModeSLong),
            b'4' => Some(FrameType::Status),
            _ => None,
        }
    }

    /// Payload length in bytes after unescaping.
    #[inline]
    pub fn payload_len(self) -> usize {
        match self {
            FrameType::ModeAc => 2,
            FrameType::ModeSShort => 7,
            FrameType::ModeSLong | FrameType::Status => 14,
        }
    }
}

/// Device types of the extended beast protocol.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeviceType {
    /// Invalid (i.e. unconfigured)
    Invalid = 0,
    /// Bogus (sending random frames)
    Bogus = 1,
    /// Standalone radarcape
    Radarcape = 2,
    /// Radarcape via network
    RadarcapeNet = 3,
    /// Radarcape via library
    RadarcapeLib = 4,
    /// Dump1090 feeder
    Feeder = 5,
    /// Dump1090 feeder: donated
    FeederDonated = 6,
    /// Dump1090 feeder: kit
    Kit = 7,
    /// Dump1090 feeder: high precision TOA branch
    FeederHptoa = 8,
    /// GRX receiver
    Grx = 9,
}

/// Raw frame: the original, still escaped on-wire bytes starting with the
/// sync byte. This is what travels downstream to the relay, bit-identical.
#[derive(Copy, Clone)]
pub struct RawFrame {
    /// Payload, valid up to `len`
    pub raw: [u8; MAX_RAW_LEN],
    /// Used length
    pub len: usize,
}

impl RawFrame {
    #[inline]
    pub fn new() -> RawFrame {
        RawFrame {
            raw: [0; MAX_RAW_LEN],
            len: 0,
        }
    }

    /// The valid on-wire bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.raw[..self.len]
    }
}

/// Decoded frame, consumed by the filter. Only the raw twin is buffered
/// for transmission.
#[derive(Debug, Copy, Clone)]
pub struct DecodedFrame {
    /// Frame type
    pub frame_type: FrameType,
    /// Receiver hardware timestamp (48 bits used)
    pub mlat: u64,
    /// Signal level, as defined by the beast protocol
    pub signal: i8,
    /// Payload length
    pub payload_len: usize,
    /// Payload
    pub payload: [u8; 14],
}

impl DecodedFrame {
    #[inline]
    pub fn new() -> DecodedFrame {
        DecodedFrame {
            frame_type: FrameType::ModeAc,
            mlat: 0,
            signal: 0,
            payload_len: 0,
            payload: [0; 14],
        }
    }
}
