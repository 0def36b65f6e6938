//! Raw frame I/O
//!
//! - [`PacketSocket`]: AF_PACKET socket bound to one interface
//! - [`InterfaceRecord`]: addresses and MAC of a translator interface
//! - [`FrameSink`] / [`FrameSource`]: where an engine writes frames and where
//!   a worker reads them, so engines can be driven without a NIC

mod af_packet;
mod interface;

pub use af_packet::{Membership, PacketSocket, SOCKET_BUFFER_SIZE};
pub use interface::{select_addresses, InterfaceRecord, Side};

use std::io;
use std::os::fd::AsRawFd;
use std::sync::Mutex;

/// Frame transmission.
///
/// Transmission is fire-and-forget: the packet path never reports errors
/// to its loop.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: &[u8]);
}

/// Nonblocking frame reception, polled by the worker loops.
pub trait FrameSource: AsRawFd + Send + Sync + 'static {
    /// Receives one frame into `buf`. `None` when nothing is queued.
    fn recv_frame(&self, buf: &mut [u8]) -> io::Result<Option<usize>>;
}

/// Sink that keeps every frame in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: Mutex<Vec<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the frames sent so far.
    pub fn take(&self) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .map(|mut f| std::mem::take(&mut *f))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSink for MemorySink {
    fn send_frame(&self, frame: &[u8]) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.push(frame.to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.send_frame(&[1, 2, 3]);
        sink.send_frame(&[4]);
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.take(), vec![vec![1, 2, 3], vec![4]]);
        assert!(sink.is_empty());
    }
}
