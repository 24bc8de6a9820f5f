//! Source-engine RCON packet layout.
//!
//! Wire format, all integers little-endian:
//!
//! ```text
//! | size: i32 | id: i32 | type: i32 | body bytes | 0x00 | 0x00 |
//! ```
//!
//! `size` counts everything after itself: 4 (id) + 4 (type) + body + 2.

/// Packet type codes. `2` is overloaded by the protocol: it means
/// auth-response from the server and exec-command from the client.
pub mod packet_type {
    pub const RESPONSE_VALUE: i32 = 0;
    pub const AUTH_RESPONSE: i32 = 2;
    pub const EXEC_COMMAND: i32 = 2;
    pub const AUTH: i32 = 3;
}

/// Smallest legal `size` value: empty body.
pub const MIN_PAYLOAD: i32 = 10;
/// Servers fragment responses past ~4k of body; anything claiming a much
/// larger payload is a framing error, not a big packet.
pub const MAX_PAYLOAD: i32 = 8192;

/// Request id the server echoes back on auth failure.
pub const AUTH_FAILED_ID: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl RconPacket {
    pub fn auth(id: i32, password: &str) -> Self {
        Self {
            id,
            kind: packet_type::AUTH,
            body: password.to_owned(),
        }
    }

    pub fn command(id: i32, command: &str) -> Self {
        Self {
            id,
            kind: packet_type::EXEC_COMMAND,
            body: command.to_owned(),
        }
    }

    /// Empty response-value packet used as an end-of-response marker:
    /// the server echoes it back after all fragments of the preceding
    /// command have been sent.
    pub fn sentinel(id: i32) -> Self {
        Self {
            id,
            kind: packet_type::RESPONSE_VALUE,
            body: String::new(),
        }
    }

    /// Value of the wire `size` field for this packet.
    pub fn payload_size(&self) -> i32 {
        (4 + 4 + self.body.len() + 2) as i32
    }
}
