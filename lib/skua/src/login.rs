use crate::beast;
use crate::gps::GpsState;
use crate::net::Network;
use crate::serial::{SerialError, SerialStore};
use crate::types::{msg, DeviceType, MAX_USERNAME};
use byteorder::{BigEndian, ByteOrder};
use std::sync::Arc;
use vane::logging::{self, Logger};

/// Daemon version, transmitted with the device id.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub release: u32,
}

impl Version {
    /// Parses a `major.minor.release` string, e.g. the crate version baked
    /// in at compile time.
    pub fn parse(version: &str) -> Option<Version> {
        let mut parts = version.splitn(3, '.');

        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let release = parts.next()?.parse().ok()?;

        Some(Version {
            major,
            minor,
            release,
        })
    }
}

/// Builds the `'A'` message: device type and daemon version, u32 big endian.
fn device_id_message(device_type: DeviceType, version: Version) -> Vec<u8> {
    let mut body = [0u8; 16];
    BigEndian::write_u32(&mut body[..4], device_type as u32);
    BigEndian::write_u32(&mut body[4..8], version.major);
    BigEndian::write_u32(&mut body[8..12], version.minor);
    BigEndian::write_u32(&mut body[12..], version.release);
    beast::message(msg::DEVICE_ID, &body)
}

/// Builds the `'5'` message: serial number, u32 big endian.
fn serial_message(serial: u32) -> Vec<u8> {
    let mut body = [0u8; 4];
    BigEndian::write_u32(&mut body, serial);
    beast::message(msg::SERIAL, &body)
}

/// Builds the `'C'` message: username, zero padded to the maximal length.
fn username_message(username: &str) -> Vec<u8> {
    let mut body = [0u8; MAX_USERNAME];
    body[..username.len()].copy_from_slice(username.as_bytes());
    beast::message(msg::USER, &body)
}

/// Login sequence, run on every fresh uplink session: device id and
/// daemon version, serial number, last known GPS position and the
/// optional username.
pub struct Login {
    device_type: DeviceType,
    version: Version,
    username: Option<String>,
    serial: Arc<SerialStore>,
    gps: Arc<GpsState>,
    log: Logger,
}

impl Login {
    pub fn new(
        device_type: DeviceType,
        version: Version,
        username: Option<&str>,
        serial: Arc<SerialStore>,
        gps: Arc<GpsState>,
        log: &Logger,
    ) -> Login {
        assert!(
            device_type != DeviceType::Invalid,
            "device type must be configured"
        );

        let log = log.new(logging::o!());

        // an oversized username is not sent at all
        let username = match username {
            Some(name) if name.is_empty() => None,
            Some(name) if name.len() > MAX_USERNAME => {
                logging::warn!(log, "username too long, not sending any";
                               "username" => name);
                None
            }
            Some(name) => Some(name.to_owned()),
            None => None,
        };

        Login {
            device_type,
            version,
            username,
            serial,
            gps,
            log,
        }
    }

    /// Runs the login sequence. Returns false if the connection broke in
    /// between; the caller tears the session down and retries.
    pub fn run(&self, net: &Network) -> bool {
        let rc = self.send_device_id(net)
            && self.send_serial(net)
            && self.gps.send_position()
            && self.send_username(net);

        if !rc {
            logging::warn!(self.log, "login failed");
        }
        rc
    }

    fn send_device_id(&self, net: &Network) -> bool {
        logging::info!(self.log, "sending device id";
                       "device_type" => ?self.device_type,
                       "version" => format!("{}.{}.{}",
                           self.version.major,
                           self.version.minor,
                           self.version.release));

        net.send(&device_id_message(self.device_type, self.version))
    }

    fn send_serial(&self, net: &Network) -> bool {
        let serial = match self.serial.get_serial(net) {
            Ok(serial) => serial,
            Err(SerialError::NetFail) => return false,
            Err(SerialError::TempFail) | Err(SerialError::PermFail) => {
                logging::error!(self.log, "no serial number configured");
                return false;
            }
        };

        logging::info!(self.log, "sending serial number"; "serial" => serial);
        net.send(&serial_message(serial))
    }

    fn send_username(&self, net: &Network) -> bool {
        let username = match &self.username {
            Some(username) => username,
            None => return true,
        };

        logging::info!(self.log, "sending username"; "username" => %username);
        net.send(&username_message(username))
    }
}
