//! Command channel between the `sasat` tool and a running translator
//!
//! - [`protocol`]: the 8-byte request/response datagrams
//! - [`CommandHandler`]: request dispatch and accounting
//! - [`ControlServer`]: the daemon side, with signals and the periodic tick
//! - [`CommandClient`]: the tool side

pub mod client;
mod handler;
pub mod protocol;
mod server;

pub use client::CommandClient;
pub use handler::{Action, CommandHandler, CommandStat, ControlTarget, Dispatch};
pub use protocol::{Request, Response};
pub use server::{ControlServer, Daemon, MIN_GARP_INTERVAL};
