use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("interface {name} not found")]
    InterfaceNotFound { name: String },

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("{op} failed: {source}")]
    Socket {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("netlink error: {0}")]
    Netlink(String),

    #[error("command protocol error: {0}")]
    Protocol(String),

    #[error("SASAT translator already running (pid {pid})")]
    AlreadyRunning { pid: i32 },
}

impl Error {
    /// Wraps `errno` of the last failed libc call.
    pub fn last_os(op: &'static str) -> Self {
        Error::Socket {
            op,
            source: io::Error::last_os_error(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
