//! RCON client for ARK: Survival Ascended game servers.

mod client;
mod codec;
mod error;
mod protocol;

pub use client::RconClient;
pub use codec::RconCodec;
pub use error::RconError;
pub use protocol::{packet_type, RconPacket};
