use crate::beast;
use crate::net::Network;
use crate::types::msg;
use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use vane::logging::{self, Logger};

/// Wait granularity while a requested serial number is outstanding.
const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Poll rounds before the connection is torn down and retried.
const MAX_ROUNDS: u32 = 30;

/// Failure modes of the serial number acquisition.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SerialError {
    /// No serial number yet, worth retrying later
    TempFail,
    /// Network failure while requesting
    NetFail,
    /// No serial number and no way to obtain one
    PermFail,
}

/// Persisted device identity, one section with the issued serial.
#[derive(Debug, Serialize, Deserialize)]
struct DeviceState {
    #[serde(rename = "Device")]
    device: DeviceSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeviceSection {
    serial: u32,
}

/// Device serial number store.
///
/// The serial is either configured, restored from the state file of a
/// previous issuance, or requested from the server. A request round-trips
/// through the talkback channel: the response handler fulfills the store
/// and wakes the login sequence waiting on it.
pub struct SerialStore {
    serial: Mutex<Option<u32>>,
    cond: Condvar,
    path: PathBuf,
    log: Logger,
}

impl SerialStore {
    /// Creates the store. A configured serial wins over the state file of
    /// an earlier issuance.
    pub fn new(state_dir: &Path, configured: Option<u32>, log: &Logger) -> SerialStore {
        let path = state_dir.join("serial.conf");
        let log = log.new(logging::o!());

        let serial = configured.or_else(|| Self::load(&path, &log));

        SerialStore {
            serial: Mutex::new(serial),
            cond: Condvar::new(),
            path,
            log,
        }
    }

    fn load(path: &Path, log: &Logger) -> Option<u32> {
        if !path.exists() {
            return None;
        }

        match serdeconv::from_toml_file::<DeviceState, _>(path) {
            Ok(state) => {
                logging::info!(log, "restored serial number";
                               "serial" => state.device.serial);
                Some(state.device.serial)
            }
            Err(err) => {
                logging::warn!(log, "could not read serial state file";
                               "path" => %path.display(), "error" => %err);
                None
            }
        }
    }

    /// True if a serial number is available without a server round-trip.
    pub fn has_serial(&self) -> bool {
        self.serial.lock().unwrap().is_some()
    }

    /// Returns the serial number, requesting one from the server if none
    /// is known yet.
    ///
    /// The request is answered on the talkback channel; this call polls in
    /// short rounds so connection failures are noticed promptly, and tears
    /// the connection down after one minute without a response.
    pub fn get_serial(&self, net: &Network) -> Result<u32, SerialError> {
        let mut serial = self.serial.lock().unwrap();

        if let Some(number) = *serial {
            return Ok(number);
        }

        logging::info!(self.log, "requesting new serial number");
        if !net.send(&beast::message(msg::SERIAL_REQUEST, &[])) {
            return Err(SerialError::NetFail);
        }

        let mut rounds = 1;
        loop {
            let (guard, result) = self.cond.wait_timeout(serial, POLL_INTERVAL).unwrap();
            serial = guard;

            if let Some(number) = *serial {
                logging::info!(self.log, "got a new serial number";
                               "serial" => number);
                self.persist(number);
                return Ok(number);
            }

            if !result.timed_out() {
                continue;
            }

            if !net.check_connected() {
                return Err(SerialError::NetFail);
            }

            if rounds == MAX_ROUNDS {
                logging::warn!(self.log,
                    "no serial number after one minute, reconnecting");
                net.force_disconnect();
                return Err(SerialError::NetFail);
            }

            if rounds % 5 == 0 {
                logging::warn!(self.log, "no serial number yet, keep waiting";
                               "waited_secs" => u64::from(rounds) * 2);
            }
            rounds += 1;
        }
    }

    /// Talkback: fulfills an outstanding serial request.
    pub fn fulfill(&self, serial: u32) {
        *self.serial.lock().unwrap() = Some(serial);
        self.cond.notify_all();
    }

    /// Writes the issued serial to the state file: to a temporary first,
    /// then renamed into place.
    fn persist(&self, serial: u32) {
        let state = DeviceState {
            device: DeviceSection { serial },
        };

        let tmp = self.path.with_extension("tmp");
        let written = serdeconv::to_toml_file(&state, &tmp)
            .map_err(|err| err.to_string())
            .and_then(|_| fs::rename(&tmp, &self.path).map_err(|err| err.to_string()));

        if let Err(err) = written {
            logging::error!(self.log, "could not persist serial number";
                            "path" => %self.path.display(), "error" => err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctl::Shutdown;
    use crate::net::NetworkConfig;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::thread;

    fn store(dir: &Path, configured: Option<u32>) -> SerialStore {
        SerialStore::new(dir, configured, &logging::null())
    }

    fn offline_net() -> Network {
        Network::new(
            NetworkConfig {
                host: "127.0.0.1".to_owned(),
                port: 0,
                reconnect_interval: 1,
            },
            Arc::new(Shutdown::new()),
            &logging::null(),
        )
    }

    #[test]
    fn test_configured_serial() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Some(4711));
        let net = offline_net();

        assert!(store.has_serial());
        assert_eq!(store.get_serial(&net), Ok(4711));
    }

    #[test]
    fn test_request_fails_offline() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), None);
        let net = offline_net();

        assert!(!store.has_serial());
        assert_eq!(store.get_serial(&net), Err(SerialError::NetFail));
    }

    #[test]
    fn test_roundtrip_and_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();

        let net = Arc::new(offline_net());
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        net.install(Arc::new(client));

        let store = Arc::new(store(dir.path(), None));

        let waiter = {
            let store = store.clone();
            let net = net.clone();
            thread::spawn(move || store.get_serial(&net))
        };

        // the server sees the request and answers via the talkback path
        let mut request = [0u8; 2];
        server.read_exact(&mut request).unwrap();
        assert_eq!(&request, &[0x1a, b'B']);

        store.fulfill(0x00beef);
        assert_eq!(waiter.join().unwrap(), Ok(0x00beef));

        // the issuance survives a restart
        let restored = SerialStore::new(dir.path(), None, &logging::null());
        assert!(restored.has_serial());
        assert_eq!(restored.get_serial(&offline_net()), Ok(0x00beef));
    }

    #[test]
    fn test_configured_wins_over_state_file() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), None).persist(1111);

        let store = store(dir.path(), Some(2222));
        assert_eq!(store.get_serial(&offline_net()), Ok(2222));
    }
}
