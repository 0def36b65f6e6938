//! Command datagram codec
//!
//! Both messages are 8 bytes with the magic in host byte order:
//!
//! ```text
//! request:  magic u32 | id u8 | data u8 | reserved [u8; 2]
//! response: magic u32 | id u8 | data u8 | result u8 | reason u8
//! ```

use thiserror::Error;

pub const MAGIC: u32 = 0x4672_6e74;

pub const REQUEST_LEN: usize = 8;
pub const RESPONSE_LEN: usize = 8;

/// Reload the policy file (front only)
pub const ID_RELOAD: u8 = 1;
/// Write a dump; data is a section bitmask
pub const ID_DUMP: u8 = 2;
/// Event trace off (0) or on (1)
pub const ID_TRACE: u8 = 3;

pub const RESULT_OK: u8 = 0;
pub const RESULT_NG: u8 = 0xff;

/// Request id not served by this translator
pub const REASON_UNKNOWN_ID: u8 = 1;
/// Request data out of range
pub const REASON_BAD_VALUE: u8 = 2;

/// Why a datagram is not a request at all. Such datagrams get no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Malformed {
    #[error("bad request length {0}")]
    Length(usize),
    #[error("bad magic {0:#010x}")]
    Magic(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub id: u8,
    pub data: u8,
}

impl Request {
    pub fn new(id: u8, data: u8) -> Self {
        Self { id, data }
    }

    pub fn reload() -> Self {
        Self::new(ID_RELOAD, 0)
    }

    pub fn dump(sections: u8) -> Self {
        Self::new(ID_DUMP, sections)
    }

    pub fn trace(on: bool) -> Self {
        Self::new(ID_TRACE, u8::from(on))
    }

    pub fn encode(&self) -> [u8; REQUEST_LEN] {
        let mut buf = [0u8; REQUEST_LEN];
        buf[..4].copy_from_slice(&MAGIC.to_ne_bytes());
        buf[4] = self.id;
        buf[5] = self.data;
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Malformed> {
        if buf.len() != REQUEST_LEN {
            return Err(Malformed::Length(buf.len()));
        }
        let magic = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != MAGIC {
            return Err(Malformed::Magic(magic));
        }
        Ok(Self {
            id: buf[4],
            data: buf[5],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub id: u8,
    pub data: u8,
    pub result: u8,
    pub reason: u8,
}

impl Response {
    /// Answer to `req`; a zero `reason` means success.
    pub fn to(req: &Request, reason: u8) -> Self {
        Self {
            id: req.id,
            data: req.data,
            result: if reason == 0 { RESULT_OK } else { RESULT_NG },
            reason,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result == RESULT_OK
    }

    pub fn encode(&self) -> [u8; RESPONSE_LEN] {
        let mut buf = [0u8; RESPONSE_LEN];
        buf[..4].copy_from_slice(&MAGIC.to_ne_bytes());
        buf[4] = self.id;
        buf[5] = self.data;
        buf[6] = self.result;
        buf[7] = self.reason;
        buf
    }

    /// Only the length is checked; the translator echoes the request
    /// header as is.
    pub fn decode(buf: &[u8]) -> Result<Self, Malformed> {
        if buf.len() != RESPONSE_LEN {
            return Err(Malformed::Length(buf.len()));
        }
        Ok(Self {
            id: buf[4],
            data: buf[5],
            result: buf[6],
            reason: buf[7],
        })
    }
}
