use crate::ctl::Shutdown;
use std::io::{Read, Write};
use std::net::{Shutdown as SockShutdown, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, SystemTime};
use vane::logging::{self, Logger};

/// Current unix timestamp, for the online-seconds accounting. Wall clock
/// on purpose: the statistics are compared against server-side records.
#[inline]
fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Connection status.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ConnState {
    Disconnected,
    Connected,
    ShuttingDown,
}

/// Secondary status while the two halves of the duplex are unsynchronized
/// about a failure. The leader is the half that observed it first.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Transit {
    None,
    SendLeads,
    RecvLeads,
}

/// Which half observed a connection failure.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum EmitBy {
    Send,
    Recv,
}

impl EmitBy {
    #[inline]
    fn leads(self) -> Transit {
        match self {
            EmitBy::Send => Transit::SendLeads,
            EmitBy::Recv => Transit::RecvLeads,
        }
    }
}

/// Action for the caller after a failure was reported: the connection may
/// have been reestablished in the meantime, retry in that case.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Action {
    None,
    Retry,
}

/// Network statistics snapshot.
#[derive(Debug, Default, Clone)]
pub struct NetworkStatistics {
    pub is_online: bool,
    pub online_secs: u64,
    pub disconnects: u64,
    pub connection_attempts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

struct NetState {
    conn: ConnState,
    transit: Transit,
    /// Socket slot of the sending half
    send_sock: Option<Arc<TcpStream>>,
    /// Socket slot of the receiving half
    recv_sock: Option<Arc<TcpStream>>,
    online_since: u64,
    stats: NetworkStatistics,
}

impl NetState {
    /// Splits the slots into (own, other) for the given half.
    #[inline]
    fn slots(
        &mut self,
        by: EmitBy,
    ) -> (&mut Option<Arc<TcpStream>>, &mut Option<Arc<TcpStream>>) {
        match by {
            EmitBy::Send => (&mut self.send_sock, &mut self.recv_sock),
            EmitBy::Recv => (&mut self.recv_sock, &mut self.send_sock),
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    /// Seconds between reconnection attempts
    pub reconnect_interval: u64,
}

/// The single uplink session to the collection server.
///
/// The sending and the receiving half both run blocking socket calls
/// concurrently on the same session. On failure, the half that observes it
/// first becomes the leader: it shuts the socket down (leaving the
/// descriptor open so the follower's blocking call fails too) and flips the
/// state. The follower later observes the transit state, releases the stale
/// descriptor and adopts the fresh socket installed by the mainloop. This
/// way every session is torn down exactly once and no descriptor is closed
/// while the other half still blocks on it.
pub struct Network {
    state: Mutex<NetState>,
    cond: Condvar,
    /// Serializes senders so messages are not interleaved on the wire
    send_lock: Mutex<()>,
    cfg: NetworkConfig,
    shutdown: Arc<Shutdown>,
    log: Logger,
}

impl Network {
    pub fn new(cfg: NetworkConfig, shutdown: Arc<Shutdown>, log: &Logger) -> Network {
        Network {
            state: Mutex::new(NetState {
                conn: ConnState::Disconnected,
                transit: Transit::None,
                send_sock: None,
                recv_sock: None,
                online_since: 0,
                stats: NetworkStatistics::default(),
            }),
            cond: Condvar::new(),
            send_lock: Mutex::new(()),
            cfg,
            shutdown,
            log: log.new(logging::o!()),
        }
    }

    /// Mainloop: (re)establishes the connection on failure. After a
    /// successful connect the login sequence runs; its failure tears the
    /// session down through the regular disconnect paths and the loop
    /// retries.
    pub fn mainloop<F: Fn(&Network) -> bool>(&self, login: F) {
        loop {
            if self.shutdown.is_set() {
                return;
            }

            // connect with retry
            let stream = loop {
                self.state.lock().unwrap().stats.connection_attempts += 1;

                match TcpStream::connect((&self.cfg.host[..], self.cfg.port)) {
                    Ok(stream) => break stream,
                    Err(err) => {
                        logging::warn!(self.log, "could not connect";
                                       "host" => %self.cfg.host,
                                       "port" => self.cfg.port,
                                       "error" => %err);
                        if !self
                            .shutdown
                            .sleep(Duration::from_secs(self.cfg.reconnect_interval))
                        {
                            return;
                        }
                    }
                }
            };

            logging::info!(self.log, "connected";
                           "host" => %self.cfg.host, "port" => self.cfg.port);

            self.install(Arc::new(stream));

            // a failed login tears the session down through the regular
            // disconnect paths and the wait below falls through
            let _ = login(self);

            // wait for failure
            {
                let mut state = self.state.lock().unwrap();
                while state.conn == ConnState::Connected {
                    state = self.cond.wait(state).unwrap();
                }
                if state.conn == ConnState::ShuttingDown {
                    return;
                }
                state.stats.disconnects += 1;
            }
        }
    }

    /// Installs a fresh socket. Only the leader's slot is stale; the
    /// follower still holds the old one until it observes the transit state.
    pub(crate) fn install(&self, stream: Arc<TcpStream>) {
        let mut state = self.state.lock().unwrap();

        match state.transit {
            Transit::None => {
                state.send_sock = Some(stream.clone());
                state.recv_sock = Some(stream);
            }
            Transit::SendLeads => state.send_sock = Some(stream),
            Transit::RecvLeads => state.recv_sock = Some(stream),
        }

        state.conn = ConnState::Connected;
        state.online_since = timestamp_secs();
        self.cond.notify_all();
    }

    /// Upon failure: determines the action to be taken, depending on which
    /// half detected it and the current state.
    fn emit_disconnect(&self, by: EmitBy) -> Action {
        let mut state = self.state.lock().unwrap();
        let leads = by.leads();

        logging::debug!(self.log, "failure reported";
                        "context" => "emit_disconnect",
                        "by" => ?by,
                        "conn" => ?state.conn,
                        "transit" => ?state.transit);

        if state.conn == ConnState::Connected {
            if state.transit == Transit::None {
                // new leader: shut the socket down but keep the descriptor
                // alive in the follower's slot so it sees the failure
                logging::info!(self.log, "connection lost");
                let (own, _) = state.slots(by);
                if let Some(sock) = own.take() {
                    drop(sock.shutdown(SockShutdown::Both));
                }
                state.transit = leads;
                state.conn = ConnState::Disconnected;
                let elapsed = timestamp_secs().saturating_sub(state.online_since);
                state.stats.online_secs += elapsed;
                self.cond.notify_all();
            } else if state.transit == leads {
                // the leader failed again before the follower caught up
                logging::info!(self.log, "connection lost");
                let (own, _) = state.slots(by);
                if let Some(sock) = own.take() {
                    drop(sock.shutdown(SockShutdown::Both));
                }
                state.conn = ConnState::Disconnected;
                let elapsed = timestamp_secs().saturating_sub(state.online_since);
                state.stats.online_secs += elapsed;
                self.cond.notify_all();
            } else {
                // the follower caught up while the connection is already
                // back: release the stale socket, adopt the fresh one
                let (own, other) = state.slots(by);
                *own = other.clone();
                state.transit = Transit::None;
            }
        } else if state.conn == ConnState::Disconnected
            && state.transit != leads
            && state.transit != Transit::None
        {
            // the follower observed a failure the leader already reported
            let (own, _) = state.slots(by);
            *own = None;
            state.transit = Transit::None;
        }

        if state.conn == ConnState::Connected {
            Action::Retry
        } else {
            Action::None
        }
    }

    /// Sends the whole buffer. Returns false on network failure; the frame
    /// in flight is the caller's to requeue.
    pub fn send(&self, buf: &[u8]) -> bool {
        let _guard = self.send_lock.lock().unwrap();

        let stream = match self.state.lock().unwrap().send_sock.clone() {
            Some(stream) => stream,
            None => {
                self.emit_disconnect(EmitBy::Send);
                return false;
            }
        };

        let mut writer: &TcpStream = &stream;
        match writer.write_all(buf) {
            Ok(()) => {
                self.state.lock().unwrap().stats.bytes_sent += buf.len() as u64;
                true
            }
            Err(err) => {
                logging::debug!(self.log, "could not send"; "error" => %err);
                self.emit_disconnect(EmitBy::Send);
                false
            }
        }
    }

    /// Receives some data. Returns the number of bytes read, or 0 once the
    /// connection is gone and not immediately recovered.
    pub fn receive(&self, buf: &mut [u8]) -> usize {
        loop {
            let stream = self.state.lock().unwrap().recv_sock.clone();

            let count = match stream {
                Some(stream) => {
                    let mut reader: &TcpStream = &stream;
                    reader.read(buf).unwrap_or(0)
                }
                None => 0,
            };

            if count > 0 {
                self.state.lock().unwrap().stats.bytes_received += count as u64;
                return count;
            }

            if self.emit_disconnect(EmitBy::Recv) != Action::Retry {
                return 0;
            }
        }
    }

    /// Blocks until the connection is established. Returns false when the
    /// process is shutting down instead.
    pub fn wait_connected(&self) -> bool {
        let mut state = self.state.lock().unwrap();

        loop {
            match state.conn {
                ConnState::Connected => return true,
                ConnState::ShuttingDown => return false,
                ConnState::Disconnected => state = self.cond.wait(state).unwrap(),
            }
        }
    }

    /// Forces a reconnection. Must only be called by the sending thread.
    pub fn force_disconnect(&self) {
        self.emit_disconnect(EmitBy::Send);
    }

    /// Checks whether the session is usable for the sending half, reporting
    /// a failure if it is not. Must only be called by the sending thread.
    pub fn check_connected(&self) -> bool {
        let emit = {
            let state = self.state.lock().unwrap();
            state.conn != ConnState::Connected || state.transit == Transit::SendLeads
        };

        if emit {
            self.emit_disconnect(EmitBy::Send);
            false
        } else {
            true
        }
    }

    /// Stops the mainloop and unblocks both halves.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();

        if let Some(sock) = state.send_sock.take() {
            drop(sock.shutdown(SockShutdown::Both));
        }
        if let Some(sock) = state.recv_sock.take() {
            drop(sock.shutdown(SockShutdown::Both));
        }

        state.conn = ConnState::ShuttingDown;
        self.cond.notify_all();
    }

    /// Statistics snapshot.
    pub fn statistics(&self) -> NetworkStatistics {
        let state = self.state.lock().unwrap();
        let mut stats = state.stats.clone();
        stats.is_online = state.conn == ConnState::Connected;
        if stats.is_online {
            stats.online_secs += timestamp_secs().saturating_sub(state.online_since);
        }
        stats
    }
}
