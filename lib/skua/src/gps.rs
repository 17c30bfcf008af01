use crate::beast;
use crate::net::Network;
use crate::types::msg;
use byteorder::{BigEndian, ByteOrder};
use std::sync::{Arc, Mutex};
use vane::logging::{self, Logger};

#[derive(Debug, Default, Copy, Clone)]
struct Position {
    latitude: f64,
    longitude: f64,
    altitude: f64,
}

struct GpsInner {
    position: Position,
    has_position: bool,
    has_fix: bool,
    /// A send was requested while no usable position was available; the
    /// next update that completes the position sends it.
    need_position: bool,
}

/// Holder of the receiver's GPS position.
///
/// The GPS frontend pushes updates in; the login sequence pulls the
/// position out. When the position is not usable at login time, the send
/// is deferred until position and fix are both known.
pub struct GpsState {
    inner: Mutex<GpsInner>,
    net: Arc<Network>,
    log: Logger,
}

/// Builds the `'7'` position message: three IEEE-754 doubles, big endian.
fn position_message(position: &Position) -> Vec<u8> {
    let mut body = [0u8; 24];
    BigEndian::write_f64(&mut body[..8], position.latitude);
    BigEndian::write_f64(&mut body[8..16], position.longitude);
    BigEndian::write_f64(&mut body[16..], position.altitude);
    beast::message(msg::GPS_POSITION, &body)
}

impl GpsState {
    pub fn new(net: Arc<Network>, log: &Logger) -> GpsState {
        GpsState {
            inner: Mutex::new(GpsInner {
                position: Position::default(),
                has_position: false,
                has_fix: false,
                need_position: false,
            }),
            net,
            log: log.new(logging::o!()),
        }
    }

    /// Resets position, fix and the deferred-send flag.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.need_position = false;
        inner.has_position = false;
        inner.has_fix = false;
    }

    /// Updates the position.
    pub fn set_position(&self, latitude: f64, longitude: f64, altitude: f64) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.position = Position {
                latitude,
                longitude,
                altitude,
            };
            inner.has_position = true;
        }

        self.send_position_if_needed();
    }

    /// Updates the position of a receiver that also reports a valid fix.
    pub fn set_position_with_fix(&self, latitude: f64, longitude: f64, altitude: f64) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.position = Position {
                latitude,
                longitude,
                altitude,
            };
            inner.has_position = true;
            inner.has_fix = true;
        }

        self.send_position_if_needed();
    }

    /// Updates the fix state.
    pub fn set_has_fix(&self, fix: bool) {
        self.inner.lock().unwrap().has_fix = fix;
        self.send_position_if_needed();
    }

    /// Requests a position send as soon as position and fix are available.
    pub fn request_send(&self) {
        self.inner.lock().unwrap().need_position = true;
        self.send_position_if_needed();
    }

    /// Sends the position if one was requested and it became usable. A
    /// failed transmission keeps the request pending, so the next update
    /// retries.
    pub fn send_position_if_needed(&self) {
        let position = {
            let inner = self.inner.lock().unwrap();
            if !inner.need_position {
                return;
            }
            if !inner.has_position {
                logging::info!(self.log,
                    "should send position, but have none, deferring");
                return;
            }
            if !inner.has_fix {
                logging::info!(self.log,
                    "should send position, but have no fix, deferring");
                return;
            }
            inner.position
        };

        // transmit without holding the position lock
        if self.transmit(&position) {
            self.inner.lock().unwrap().need_position = false;
        } else {
            logging::info!(self.log, "could not send position, deferring");
        }
    }

    /// Login path: sends the current position, or defers the send when
    /// position or fix are missing.
    ///
    /// Returns true if the position was sent or the send was deferred.
    pub fn send_position(&self) -> bool {
        let position = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.has_position {
                logging::info!(self.log,
                    "should send position, but have none, deferring");
                inner.need_position = true;
                return true;
            }
            if !inner.has_fix {
                logging::info!(self.log,
                    "should send position, but have no fix, deferring");
                inner.need_position = true;
                return true;
            }
            inner.position
        };

        self.transmit(&position)
    }

    fn transmit(&self, position: &Position) -> bool {
        logging::info!(self.log, "sending position";
                       "latitude" => format!("{:+.4}", position.latitude),
                       "longitude" => format!("{:+.4}", position.longitude),
                       "altitude" => format!("{:+.2}", position.altitude));

        self.net.send(&position_message(position))
    }
}
