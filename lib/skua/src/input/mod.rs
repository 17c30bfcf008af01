//! Receiver input: the driver contract, the streaming frame parser and the
//! option channel through which the receiver is configured.

pub mod net;

use crate::filter::FilterConfig;
use crate::types::{DecodedFrame, FrameType, RawFrame, SYNC};
use byteorder::{BigEndian, ByteOrder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use vane::logging::{self, Logger};

/// Size of the refilling read buffer.
const READ_BUF_SIZE: usize = 128;

/// Contract of the physical input. Implementations wrap a TCP connection,
/// a UART or a test stub.
pub trait Driver: Send + Sync {
    /// Connects to the receiver, retrying until success.
    /// Returns false only if a stop was requested.
    fn connect(&self) -> bool;

    /// Closes the connection.
    fn disconnect(&self);

    /// Reads available data into `buf`. Returns 0 on connection loss.
    fn read(&self, buf: &mut [u8]) -> usize;

    /// Writes `buf`. Returns the number of bytes written, 0 on failure.
    fn write(&self, buf: &[u8]) -> usize;
}

/// Receiver options, written to the driver as `SYNC '1' <option>`.
#[derive(Debug, Copy, Clone)]
enum ReceiverOption {
    /// Output format: binary
    OutputFormatBin = b'C' as isize,
    /// Filter: output DF-11/17/18 frames only
    FrameFilterDf111718Only = b'D' as isize,
    /// Filter: output all frames
    FrameFilterAll = b'd' as isize,
    /// Include timestamps when using the AVR output format
    AvrFormatMlat = b'E' as isize,
    /// CRC: check DF-11/17/18 frames
    CrcEnabled = b'f' as isize,
    /// CRC: don't check DF-11/17/18 frames
    CrcDisabled = b'F' as isize,
    /// Timestamp source: GPS
    TimestampSourceGps = b'G' as isize,
    /// RTS handshake: enabled
    RtsHandshakeEnabled = b'H' as isize,
    /// FEC: enable error correction on DF-11/17/18 frames
    FecEnabled = b'i' as isize,
    /// FEC: disable error correction on DF-11/17/18 frames
    FecDisabled = b'I' as isize,
    /// Mode-AC decoding: disabled
    ModeAcDecodingDisabled = b'j' as isize,
    /// LED: yellow
    LedYellow = b'Y' as isize,
    /// LED: red
    LedRed = b'R' as isize,
}

/// Input statistics, shared between the parser and its observers.
#[derive(Debug, Default)]
pub struct InputStatistics {
    pub out_of_sync: AtomicU64,
    pub frame_type_unknown: AtomicU64,
}

/// Shared handle for writing receiver options. The filter uses it to push
/// a changed frame-filter policy down to the receiver at runtime.
pub struct InputControl {
    driver: Arc<dyn Driver>,
    filter_cfg: Arc<FilterConfig>,
    fec: bool,
    log: Logger,
}

impl InputControl {
    pub fn new(
        driver: Arc<dyn Driver>,
        filter_cfg: Arc<FilterConfig>,
        fec: bool,
        log: &Logger,
    ) -> InputControl {
        InputControl {
            driver,
            filter_cfg,
            fec,
            log: log.new(logging::o!()),
        }
    }

    #[inline]
    fn frame_filter_option(&self) -> ReceiverOption {
        if self.filter_cfg.ext_squitter() {
            ReceiverOption::FrameFilterDf111718Only
        } else {
            ReceiverOption::FrameFilterAll
        }
    }

    /// Writes one option to the receiver.
    fn set_option(&self, option: ReceiverOption) -> bool {
        let cmd = [SYNC, b'1', option as u8];
        self.driver.write(&cmd) == cmd.len()
    }

    /// Writes the full receiver configuration sequence.
    fn configure(&self) -> bool {
        let crc = if self.filter_cfg.crc() {
            ReceiverOption::CrcEnabled
        } else {
            ReceiverOption::CrcDisabled
        };
        let fec = if self.fec {
            ReceiverOption::FecEnabled
        } else {
            ReceiverOption::FecDisabled
        };

        self.set_option(ReceiverOption::OutputFormatBin)
            && self.set_option(self.frame_filter_option())
            && self.set_option(ReceiverOption::AvrFormatMlat)
            && self.set_option(crc)
            && self.set_option(ReceiverOption::TimestampSourceGps)
            && self.set_option(ReceiverOption::RtsHandshakeEnabled)
            && self.set_option(fec)
            && self.set_option(ReceiverOption::ModeAcDecodingDisabled)
            && self.set_option(ReceiverOption::LedYellow)
            && self.set_option(ReceiverOption::LedRed)
    }

    /// Re-sends the frame filter option, the only one whose runtime change
    /// is meaningful.
    pub fn reconfigure(&self) {
        if !self.set_option(self.frame_filter_option()) {
            logging::warn!(self.log, "could not reconfigure receiver frame filter");
        }
    }
}

/// Result of one unescape run.
enum DecodeStatus {
    Ok,
    Resync,
    ConnFail,
}

/// Streaming frame parser.
///
/// Drives the beast codec from a refilling read buffer: synchronizes on
/// frame boundaries, unescapes body bytes and simultaneously accumulates
/// the raw, still escaped bytes for bit-identical retransmission.
pub struct Parser {
    ctl: Arc<InputControl>,
    buf: [u8; READ_BUF_SIZE],
    cur: usize,
    end: usize,
    stats: Arc<InputStatistics>,
    log: Logger,
}

impl Parser {
    pub fn new(ctl: Arc<InputControl>, stats: Arc<InputStatistics>, log: &Logger) -> Parser {
        Parser {
            ctl,
            buf: [0; READ_BUF_SIZE],
            cur: 0,
            end: 0,
            stats,
            log: log.new(logging::o!()),
        }
    }

    /// Connects the driver and configures the receiver, repeating until
    /// both succeed. Returns false only if a stop was requested.
    /// The read buffer is reset on reconnect.
    pub fn connect(&mut self) -> bool {
        loop {
            if !self.ctl.driver.connect() {
                return false;
            }

            if self.ctl.configure() {
                break;
            }
        }

        self.cur = 0;
        self.end = 0;
        true
    }

    /// Disconnects the driver.
    pub fn disconnect(&self) {
        self.ctl.driver.disconnect();
    }

    /// Reads the next frame that survives resynchronization.
    ///
    /// Blocking; returns false only on connection loss. `raw` receives the
    /// on-wire bytes starting at the sync, `decoded` the unescaped frame.
    pub fn get_frame(&mut self, raw: &mut RawFrame, decoded: &mut DecodedFrame) -> bool {
        raw.raw[0] = SYNC;

        // synchronize on the frame start
        let sync = match self.next() {
            Some(ch) => ch,
            None => return false,
        };
        if sync != SYNC {
            logging::warn!(self.log, "out of sync";
                           "got" => format!("{:#04x}", sync));
            self.stats.out_of_sync.fetch_add(1, Ordering::Relaxed);
            if !self.synchronize() {
                return false;
            }
        }

        loop {
            // decode the type byte; after a resynchronization the cursor is
            // already at the type position of the next frame
            let type_ch = match self.next() {
                Some(ch) => ch,
                None => return false,
            };

            let frame_type = match FrameType::from_wire(type_ch) {
                Some(frame_type) => frame_type,
                None => {
                    if type_ch == SYNC {
                        logging::warn!(self.log,
                            "out of sync: unescaped sync inside frame");
                        self.stats.out_of_sync.fetch_add(1, Ordering::Relaxed);
                    } else {
                        logging::warn!(self.log, "unknown frame type";
                                       "frame_type" => (type_ch as char).to_string());
                        self.stats.frame_type_unknown.fetch_add(1, Ordering::Relaxed);
                    }
                    if !self.synchronize() {
                        return false;
                    }
                    continue;
                }
            };

            decoded.frame_type = frame_type;
            decoded.payload_len = frame_type.payload_len();
            raw.raw[1] = type_ch;
            raw.len = 2;

            // decode the 7 byte header: 48 bit timestamp and signal level
            let mut hdr = [0u8; 7];
            match self.decode_run(&mut hdr, raw) {
                DecodeStatus::Ok => (),
                DecodeStatus::Resync => {
                    self.stats.out_of_sync.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                DecodeStatus::ConnFail => return false,
            }
            decoded.mlat = BigEndian::read_u48(&hdr[..6]);
            decoded.signal = hdr[6] as i8;

            // decode the payload
            let payload_len = decoded.payload_len;
            match self.decode_run(&mut decoded.payload[..payload_len], raw) {
                DecodeStatus::Ok => (),
                DecodeStatus::Resync => {
                    self.stats.out_of_sync.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                DecodeStatus::ConnFail => return false,
            }

            return true;
        }
    }

    /// Unescapes `dst.len()` body bytes into `dst`, appending the consumed
    /// raw bytes to `raw`.
    ///
    /// On `Resync` the cursor points at the first byte after an unescaped
    /// sync, which is the type position of the next frame.
    fn decode_run(&mut self, dst: &mut [u8], raw: &mut RawFrame) -> DecodeStatus {
        let mut pos = 0;

        while pos < dst.len() {
            if self.cur == self.end && !self.fill() {
                return DecodeStatus::ConnFail;
            }

            // search for an escape within the expected remaining length
            let remaining = dst.len() - pos;
            let window = (self.end - self.cur).min(remaining);
            let escape = self.buf[self.cur..self.cur + window]
                .iter()
                .position(|&ch| ch == SYNC);

            match escape {
                Some(at) => {
                    // copy up to and including the escape to the raw frame,
                    // excluding it from the unescaped body
                    raw.raw[raw.len..raw.len + at + 1]
                        .copy_from_slice(&self.buf[self.cur..self.cur + at + 1]);
                    raw.len += at + 1;
                    dst[pos..pos + at].copy_from_slice(&self.buf[self.cur..self.cur + at]);
                    pos += at;
                    self.cur += at + 1;

                    // peek the next symbol
                    if self.cur == self.end && !self.fill() {
                        return DecodeStatus::ConnFail;
                    }
                    if self.buf[self.cur] != SYNC {
                        return DecodeStatus::Resync;
                    }

                    // escaped sync: one body byte
                    dst[pos] = SYNC;
                    pos += 1;
                    raw.raw[raw.len] = SYNC;
                    raw.len += 1;
                    self.cur += 1;
                }
                None => {
                    dst[pos..pos + window]
                        .copy_from_slice(&self.buf[self.cur..self.cur + window]);
                    raw.raw[raw.len..raw.len + window]
                        .copy_from_slice(&self.buf[self.cur..self.cur + window]);
                    raw.len += window;
                    pos += window;
                    self.cur += window;
                }
            }
        }

        DecodeStatus::Ok
    }

    /// Discards the buffer content and fills it again.
    fn fill(&mut self) -> bool {
        let count = self.ctl.driver.read(&mut self.buf);
        if count == 0 {
            return false;
        }

        self.cur = 0;
        self.end = count;
        true
    }

    /// Consumes the next symbol.
    fn next(&mut self) -> Option<u8> {
        loop {
            if self.cur < self.end {
                let ch = self.buf[self.cur];
                self.cur += 1;
                return Some(ch);
            }

            if !self.fill() {
                return None;
            }
        }
    }

    /// Advances past the next frame boundary.
    ///
    /// Post-condition on success: the cursor points at the first byte of a
    /// new frame, which is never a sync.
    fn synchronize(&mut self) -> bool {
        loop {
            let sync = self.buf[self.cur..self.end]
                .iter()
                .position(|&ch| ch == SYNC);

            if let Some(at) = sync {
                // consume everything including the sync, then peek
                self.cur += at + 1;

                if self.cur == self.end && !self.fill() {
                    return false;
                }

                if self.buf[self.cur] != SYNC {
                    return true;
                }

                // escaped sync inside a body, keep searching
                self.cur += 1;
                if self.cur != self.end {
                    continue;
                }
            }

            if !self.fill() {
                return false;
            }
        }
    }
}
