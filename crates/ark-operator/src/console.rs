//! RCON access for rollouts.
//!
//! The orchestrator speaks to servers through the [`Console`] trait so tests
//! can script responses. The real implementation opens a fresh RCON
//! connection per command; sessions are short-lived and servers drop idle
//! connections anyway, so there is nothing worth pooling.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use ark_rcon::{RconClient, RconError};

#[async_trait]
pub trait Console: Send + Sync {
    /// Run one command against a server, returning its response body.
    async fn run(&self, host: &str, port: u16, command: &str) -> Result<String, RconError>;
}

pub struct RconConsole {
    password: String,
    timeout: Duration,
}

impl RconConsole {
    pub fn new(password: impl Into<String>, timeout: Duration) -> Self {
        Self {
            password: password.into(),
            timeout,
        }
    }

    async fn run_once(&self, host: &str, port: u16, command: &str) -> Result<String, RconError> {
        let mut client = RconClient::connect(host, port, &self.password, self.timeout).await?;
        client.execute(command, self.timeout).await
    }
}

#[async_trait]
impl Console for RconConsole {
    async fn run(&self, host: &str, port: u16, command: &str) -> Result<String, RconError> {
        match self.run_once(host, port, command).await {
            Ok(response) => Ok(response),
            // one retry on connection-level failures; a server mid-restart
            // often drops the first attempt
            Err(err) if err.is_connection() => {
                warn!(host, port, %err, "rcon connection failed, retrying");
                let response = self.run_once(host, port, command).await?;
                debug!(host, port, "rcon retry succeeded");
                Ok(response)
            }
            Err(err) => Err(err),
        }
    }
}
