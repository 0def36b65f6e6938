//! SASAT - L2 anycast translators
//!
//! A front translator answers for a virtual address and spreads incoming
//! packets over backend translators by source-address policy. Each backend
//! translator hands the packets to its server and returns the replies to the
//! clients. Frames are read and written on raw AF_PACKET sockets.

pub mod app;
pub mod capture;
pub mod config;
pub mod control;
pub mod dataplane;
pub mod error;
pub mod neighbor;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
