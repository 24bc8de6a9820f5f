//! RCON session against a single game server.
//!
//! Sessions are not shared: one in-flight command at a time, enforced by
//! `&mut self`. Large responses (player lists) arrive as several packets
//! sharing the request id; they are concatenated in arrival order until the
//! end-of-response marker is echoed back or the stream goes quiet.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, instrument, trace};

use crate::codec::RconCodec;
use crate::error::RconError;
use crate::protocol::{packet_type, RconPacket, AUTH_FAILED_ID};

/// After the first fragment, a response is considered complete once the
/// stream has been quiet this long. Fallback for servers that do not echo
/// the end-of-response marker.
const INACTIVITY_WINDOW: Duration = Duration::from_millis(250);

pub struct RconClient {
    framed: Framed<TcpStream, RconCodec>,
    next_id: i32,
}

impl RconClient {
    /// Connect and authenticate.
    #[instrument(skip(password))]
    pub async fn connect(
        host: &str,
        port: u16,
        password: &str,
        io_timeout: Duration,
    ) -> Result<Self, RconError> {
        let addr = format!("{host}:{port}");
        let stream = timeout(io_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| RconError::Timeout(io_timeout))?
            .map_err(|source| RconError::Connect {
                host: addr.clone(),
                source,
            })?;
        debug!(%addr, "connected, authenticating");

        let mut client = Self {
            framed: Framed::new(stream, RconCodec::new()),
            next_id: 0,
        };
        client.authenticate(password, io_timeout).await?;
        Ok(client)
    }

    async fn authenticate(
        &mut self,
        password: &str,
        io_timeout: Duration,
    ) -> Result<(), RconError> {
        let id = self.take_id();
        self.send(RconPacket::auth(id, password)).await?;

        let deadline = Instant::now() + io_timeout;
        loop {
            let packet = self.next_packet(deadline, io_timeout).await?;
            match packet.kind {
                packet_type::AUTH_RESPONSE => {
                    if packet.id == AUTH_FAILED_ID {
                        return Err(RconError::Auth);
                    }
                    if packet.id == id {
                        debug!("authenticated");
                        return Ok(());
                    }
                    return Err(RconError::Protocol(format!(
                        "auth response for unknown id {}",
                        packet.id
                    )));
                }
                // some servers send an empty response value before the
                // auth response
                packet_type::RESPONSE_VALUE => continue,
                other => {
                    return Err(RconError::Protocol(format!(
                        "unexpected packet type {other} during auth"
                    )));
                }
            }
        }
    }

    /// Run one command and return the full response text, reassembled from
    /// however many packets the server split it into.
    #[instrument(skip(self))]
    pub async fn execute(
        &mut self,
        command: &str,
        io_timeout: Duration,
    ) -> Result<String, RconError> {
        let id = self.take_id();
        let sentinel = self.take_id();
        self.send(RconPacket::command(id, command)).await?;
        // the server echoes this back after the last fragment
        self.send(RconPacket::sentinel(sentinel)).await?;

        let deadline = Instant::now() + io_timeout;
        let mut parts: Vec<String> = vec![];
        loop {
            let wait = if parts.is_empty() {
                deadline.saturating_duration_since(Instant::now())
            } else {
                INACTIVITY_WINDOW.min(deadline.saturating_duration_since(Instant::now()))
            };

            match timeout(wait, self.framed.next()).await {
                Err(_) => {
                    if parts.is_empty() {
                        return Err(RconError::Timeout(io_timeout));
                    }
                    trace!("stream quiet, treating response as complete");
                    break;
                }
                Ok(None) => return Err(RconError::ConnectionLost),
                Ok(Some(Err(err))) => return Err(map_stream_error(err)),
                Ok(Some(Ok(packet))) => {
                    if packet.id == sentinel {
                        trace!("end-of-response marker echoed");
                        break;
                    }
                    if packet.id == id {
                        parts.push(packet.body);
                    } else {
                        trace!(id = packet.id, "dropping packet for stale request");
                    }
                }
            }
        }

        Ok(parts.concat())
    }

    pub async fn broadcast(&mut self, message: &str, io_timeout: Duration) -> Result<(), RconError> {
        self.execute(&format!("ServerChat {message}"), io_timeout)
            .await?;
        Ok(())
    }

    pub async fn save_world(&mut self, io_timeout: Duration) -> Result<(), RconError> {
        self.execute("SaveWorld", io_timeout).await?;
        Ok(())
    }

    pub async fn do_exit(&mut self, io_timeout: Duration) -> Result<(), RconError> {
        self.execute("DoExit", io_timeout).await?;
        Ok(())
    }

    pub async fn list_players(&mut self, io_timeout: Duration) -> Result<String, RconError> {
        self.execute("ListPlayers", io_timeout).await
    }

    async fn send(&mut self, packet: RconPacket) -> Result<(), RconError> {
        self.framed.send(packet).await.map_err(map_stream_error)
    }

    async fn next_packet(
        &mut self,
        deadline: Instant,
        io_timeout: Duration,
    ) -> Result<RconPacket, RconError> {
        let wait = deadline.saturating_duration_since(Instant::now());
        match timeout(wait, self.framed.next()).await {
            Err(_) => Err(RconError::Timeout(io_timeout)),
            Ok(None) => Err(RconError::ConnectionLost),
            Ok(Some(Err(err))) => Err(map_stream_error(err)),
            Ok(Some(Ok(packet))) => Ok(packet),
        }
    }

    fn take_id(&mut self) -> i32 {
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id <= 0 {
            self.next_id = 1;
        }
        self.next_id
    }
}

impl std::fmt::Debug for RconClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RconClient")
            .field("next_id", &self.next_id)
            .finish()
    }
}

fn map_stream_error(err: std::io::Error) -> RconError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {
            RconError::ConnectionLost
        }
        ErrorKind::InvalidData | ErrorKind::Other => RconError::Protocol(err.to_string()),
        _ => RconError::Io(err),
    }
}
