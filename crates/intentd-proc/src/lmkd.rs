//! Low-memory-killer daemon protocol.
//!
//! The killer daemon listens on a reserved abstract-namespace unix socket
//! (`SOCK_SEQPACKET`); commands are sequences of native-endian 32-bit
//! integers. Delivery is best-effort: a failed write is retried up to
//! three times with a blocking one-second pause after a failed connect,
//! then dropped with a warning. A missed priority update costs nothing but
//! accuracy of the next kill decision.

use std::io;
use std::time::Duration;

use rustix::fd::OwnedFd;
use rustix::net::{AddressFamily, SendFlags, SocketAddrUnix, SocketType};

/// Command word: update the six (minfree, adj) kill targets.
pub const LMK_TARGET: i32 = 0;
/// Command word: set the priority of one process.
pub const LMK_PROCPRIO: i32 = 1;
/// Command word: forget one process.
pub const LMK_PROCREMOVE: i32 = 2;

/// Name of the daemon's socket in the abstract namespace.
pub const LMKD_SOCKET_NAME: &str = "lmkd";

const WRITE_ATTEMPTS: u32 = 3;

/// One command to the killer daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LmkCommand {
    /// Up to six `(minfree-in-pages, adj)` pairs, ascending.
    Target(Vec<(i32, i32)>),
    ProcPrio { pid: i32, uid: i32, adj: i32 },
    ProcRemove { pid: i32 },
}

impl LmkCommand {
    /// Wire encoding: the command word followed by its payload, each value
    /// a native-endian i32.
    pub fn encode(&self) -> Vec<u8> {
        let mut words: Vec<i32> = Vec::with_capacity(13);
        match self {
            LmkCommand::Target(pairs) => {
                debug_assert!(pairs.len() <= 6, "killer supports at most 6 target slots");
                words.push(LMK_TARGET);
                for &(minfree_pages, adj) in pairs.iter().take(6) {
                    words.push(minfree_pages);
                    words.push(adj);
                }
            }
            LmkCommand::ProcPrio { pid, uid, adj } => {
                words.extend_from_slice(&[LMK_PROCPRIO, *pid, *uid, *adj]);
            }
            LmkCommand::ProcRemove { pid } => {
                words.extend_from_slice(&[LMK_PROCREMOVE, *pid]);
            }
        }
        words.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }
}

/// A connected transport to the daemon.
pub trait LmkdConnection: Send {
    fn send(&mut self, packet: &[u8]) -> io::Result<()>;
}

/// Factory for daemon connections; swapped out in tests.
pub trait LmkdConnector: Send + Sync {
    fn connect(&self) -> io::Result<Box<dyn LmkdConnection>>;
}

// ---------------------------------------------------------------------------
// Real transport
// ---------------------------------------------------------------------------

/// `SOCK_SEQPACKET` connector to the daemon's abstract-namespace socket.
#[derive(Debug, Clone)]
pub struct SeqpacketConnector {
    name: String,
}

impl SeqpacketConnector {
    pub fn new() -> Self {
        Self { name: LMKD_SOCKET_NAME.to_string() }
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for SeqpacketConnector {
    fn default() -> Self {
        Self::new()
    }
}

struct SeqpacketConnection {
    fd: OwnedFd,
}

impl LmkdConnection for SeqpacketConnection {
    fn send(&mut self, packet: &[u8]) -> io::Result<()> {
        rustix::net::send(&self.fd, packet, SendFlags::empty()).map_err(io::Error::from)?;
        Ok(())
    }
}

impl LmkdConnector for SeqpacketConnector {
    fn connect(&self) -> io::Result<Box<dyn LmkdConnection>> {
        let fd = rustix::net::socket(AddressFamily::UNIX, SocketType::SEQPACKET, None)
            .map_err(io::Error::from)?;
        let addr =
            SocketAddrUnix::new_abstract_name(self.name.as_bytes()).map_err(io::Error::from)?;
        rustix::net::connect(&fd, &addr).map_err(io::Error::from)?;
        Ok(Box::new(SeqpacketConnection { fd }))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Persistent, best-effort writer of killer commands.
pub struct LmkdClient {
    connector: Box<dyn LmkdConnector>,
    connection: Option<Box<dyn LmkdConnection>>,
    retry_delay: Duration,
}

impl LmkdClient {
    pub fn new(connector: Box<dyn LmkdConnector>) -> Self {
        Self { connector, connection: None, retry_delay: Duration::from_secs(1) }
    }

    /// Override the pause after a failed connect (tests use zero).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Write one command, reconnecting and retrying up to three times.
    /// After the last failure the command is dropped; priority updates are
    /// not guaranteed delivery.
    pub fn write(&mut self, command: &LmkCommand) {
        let packet = command.encode();
        for _ in 0..WRITE_ATTEMPTS {
            if self.connection.is_none() {
                match self.connector.connect() {
                    Ok(connection) => self.connection = Some(connection),
                    Err(e) => {
                        tracing::warn!(error = %e, "low-memory-killer daemon socket open failed");
                        std::thread::sleep(self.retry_delay);
                        continue;
                    }
                }
            }
            match self.connection.as_mut().expect("connected").send(&packet) {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "error writing to low-memory-killer socket");
                    self.connection = None;
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}
