//! LoRaWAN join/send client.
//!
//! Only the AT-command state this device needs: a strict join sequence with
//! per-command timeouts, a bounded retry loop around it, and a best-effort
//! message send. Not a LoRaWAN stack.

use std::sync::Arc;
use std::time::Duration;

use dispenser_traits::{Clock, ModemPort};

use crate::error::UplinkError;

#[derive(Debug, Clone)]
pub struct UplinkCfg {
    pub app_key: String,
    pub port: u8,
    pub max_join_attempts: u32,
    pub join_retry_delay_ms: u64,
    /// Per-command response timeout for the short setup commands
    pub command_timeout_ms: u64,
    /// AT+JOIN response timeout (longest of the sequence)
    pub join_timeout_ms: u64,
    /// AT+MSG acknowledgement timeout
    pub msg_timeout_ms: u64,
}

impl Default for UplinkCfg {
    fn default() -> Self {
        Self {
            app_key: "9c3ccbe1a7b0844775a045933be85009".to_string(),
            port: 8,
            max_join_attempts: 5,
            join_retry_delay_ms: 5_000,
            command_timeout_ms: 500,
            join_timeout_ms: 17_000,
            msg_timeout_ms: 7_000,
        }
    }
}

impl From<&dispenser_config::UplinkCfg> for UplinkCfg {
    fn from(c: &dispenser_config::UplinkCfg) -> Self {
        Self {
            app_key: c.app_key.clone(),
            port: c.port,
            max_join_attempts: c.max_join_attempts,
            join_retry_delay_ms: c.join_retry_delay_ms,
            command_timeout_ms: c.command_timeout_ms,
            join_timeout_ms: c.join_timeout_ms,
            msg_timeout_ms: c.msg_timeout_ms,
        }
    }
}

fn port_err(e: Box<dyn std::error::Error + Send + Sync>) -> UplinkError {
    UplinkError::Port(e.to_string())
}

pub struct UplinkClient<P> {
    port: P,
    cfg: UplinkCfg,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl<P: ModemPort> UplinkClient<P> {
    pub fn new(port: P, cfg: UplinkCfg, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self { port, cfg, clock }
    }

    pub fn cfg(&self) -> &UplinkCfg {
        &self.cfg
    }

    /// Send one command line and wait for a response containing `expect`.
    /// `Ok(false)` is a protocol timeout/mismatch; `Err` is transport
    /// failure.
    pub fn send_command(
        &mut self,
        cmd: &str,
        expect: &str,
        timeout: Duration,
    ) -> Result<bool, UplinkError> {
        tracing::debug!(cmd, "modem >>");
        self.port.send_line(cmd).map_err(port_err)?;

        let total_ms = timeout.as_millis().min(u128::from(u64::MAX)) as u64;
        let epoch = self.clock.now();
        loop {
            let elapsed = self.clock.ms_since(epoch);
            if elapsed >= total_ms {
                return Ok(false);
            }
            let remaining = Duration::from_millis(total_ms - elapsed);
            match self.port.read_line(remaining).map_err(port_err)? {
                Some(line) => {
                    tracing::debug!(%line, "modem <<");
                    if line.contains(expect) {
                        return Ok(true);
                    }
                }
                // The port waited out the remaining window.
                None => return Ok(false),
            }
        }
    }

    /// One join attempt: strict command order, each step gated on its own
    /// timeout, any failure aborts the attempt.
    pub fn join(&mut self) -> Result<bool, UplinkError> {
        let short = Duration::from_millis(self.cfg.command_timeout_ms);

        if !self.send_command("AT", "OK", short)? {
            tracing::warn!("modem not responding to liveness check");
            return Ok(false);
        }
        if !self.send_command("AT+MODE=LWOTAA", "+MODE:", short)? {
            return Ok(false);
        }
        let key_cmd = format!("AT+KEY=APPKEY,\"{}\"", self.cfg.app_key);
        if !self.send_command(&key_cmd, "+KEY:", short)? {
            return Ok(false);
        }
        if !self.send_command("AT+CLASS=A", "+CLASS:", short)? {
            return Ok(false);
        }
        let port_cmd = format!("AT+PORT={}", self.cfg.port);
        if !self.send_command(&port_cmd, "+PORT:", short)? {
            return Ok(false);
        }
        let join_timeout = Duration::from_millis(self.cfg.join_timeout_ms);
        if !self.send_command("AT+JOIN", "+JOIN: Done", join_timeout)? {
            tracing::warn!("join timed out or failed");
            return Ok(false);
        }
        tracing::info!("join ok");
        Ok(true)
    }

    /// Bounded retry loop around `join`. Transport errors count as failed
    /// attempts; exhausting the budget leaves the device disconnected for
    /// the rest of this boot cycle.
    pub fn join_with_retry(&mut self) -> bool {
        let max = self.cfg.max_join_attempts;
        for attempt in 1..=max {
            tracing::info!(attempt, max, "join attempt");
            match self.join() {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "join attempt errored"),
            }
            if attempt < max {
                self.clock.sleep_ms(self.cfg.join_retry_delay_ms);
            }
        }
        tracing::warn!(max, "max join attempts reached, continuing offline");
        false
    }

    /// Wrap a status string in the message command and wait for the ack
    /// token. Callers treat a `false`/`Err` as a logged no-op: sending is
    /// best-effort and never blocks dispensing.
    pub fn send_message(&mut self, message: &str) -> Result<bool, UplinkError> {
        let cmd = format!("AT+MSG=\"{message}\"");
        self.send_command(&cmd, "+MSG: Done", Duration::from_millis(self.cfg.msg_timeout_ms))
    }
}
