use crate::ctl::Shutdown;
use crate::input::Driver;
use std::io::{Read, Write};
use std::net::{Shutdown as SockShutdown, TcpStream};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use vane::logging::{self, Logger};

/// Receiver input over TCP, e.g. a radarcape or dump1090 exposing the
/// beast stream on a local port.
pub struct NetDriver {
    host: String,
    port: u16,
    reconnect_interval: Duration,
    conn: RwLock<Option<TcpStream>>,
    shutdown: Arc<Shutdown>,
    log: Logger,
}

impl NetDriver {
    pub fn new(
        host: &str,
        port: u16,
        reconnect_interval: Duration,
        shutdown: Arc<Shutdown>,
        log: &Logger,
    ) -> NetDriver {
        NetDriver {
            host: host.to_owned(),
            port,
            reconnect_interval,
            conn: RwLock::new(None),
            shutdown,
            log: log.new(logging::o!()),
        }
    }

    /// Unblocks a pending read or write, e.g. when stopping the process.
    pub fn interrupt(&self) {
        let conn = self.conn.read().unwrap();
        if let Some(stream) = conn.as_ref() {
            drop(stream.shutdown(SockShutdown::Both));
        }
    }

    fn close(&self) {
        let mut conn = self.conn.write().unwrap();
        if let Some(stream) = conn.take() {
            drop(stream.shutdown(SockShutdown::Both));
        }
    }

    fn open(&self) -> bool {
        self.close();

        match TcpStream::connect((&self.host[..], self.port)) {
            Ok(stream) => {
                logging::info!(self.log, "receiver connected";
                               "host" => %self.host, "port" => self.port);
                *self.conn.write().unwrap() = Some(stream);
                true
            }
            Err(err) => {
                logging::warn!(self.log, "could not connect to receiver";
                               "host" => %self.host,
                               "port" => self.port,
                               "error" => %err);
                false
            }
        }
    }
}

impl Driver for NetDriver {
    fn connect(&self) -> bool {
        while !self.open() {
            if !self.shutdown.sleep(self.reconnect_interval) {
                return false;
            }
        }

        !self.shutdown.is_set()
    }

    fn disconnect(&self) {
        self.close();
    }

    fn read(&self, buf: &mut [u8]) -> usize {
        let result = {
            let conn = self.conn.read().unwrap();
            match conn.as_ref() {
                Some(stream) => {
                    let mut stream: &TcpStream = stream;
                    stream.read(buf)
                }
                None => return 0,
            }
        };

        match result {
            Ok(count) if count > 0 => count,
            _ => {
                logging::warn!(self.log, "could not receive from receiver");
                self.close();
                0
            }
        }
    }

    fn write(&self, buf: &[u8]) -> usize {
        let result = {
            let conn = self.conn.read().unwrap();
            match conn.as_ref() {
                Some(stream) => {
                    let mut stream: &TcpStream = stream;
                    stream.write(buf)
                }
                None => return 0,
            }
        };

        match result {
            Ok(count) if count > 0 => count,
            _ => {
                logging::warn!(self.log, "could not send to receiver");
                0
            }
        }
    }
}
