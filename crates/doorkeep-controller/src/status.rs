//! The auxiliary status board.
//!
//! Plain text lines, no checksum, one reply per command:
//!
//! | Host | Board |
//! |---|---|
//! | `?` | identity banner, `+` appended after a reset |
//! | `S0` / `S1` | `OK` (sign off / on) |
//! | `W` | `ANGLE=<n>` |
//! | `W<n>` | `OK` (move webcam servo) |
//! | `T` | `TEMP=<n>` |
//! | `B<secs>` | `OK` (ring bell) |
//!
//! The sign mirrors the facility open flag. When the upstairs door opens the
//! servo swings to the override angle for a few seconds.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use doorkeep_core::FacilityStatus;
use doorkeep_core::constants::{
    MAX_LINE_LENGTH, RECONNECT_DELAY_SECS, SERIAL_POLL_PERIOD_SECS, SERIAL_QUIET_PERIOD_MS,
};
use doorkeep_protocol::ProtocolError;
use doorkeep_runtime::Worker;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::link::{LinkOpener, drain_until_quiet, wake_link};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Expected identity banner.
    pub banner: String,
    pub read_timeout_secs: u64,
    /// Opening the port resets the board; wait this long before talking.
    pub boot_delay_secs: u64,
    pub quiet_period_ms: u64,
    pub reconnect_delay_secs: u64,
    pub temperature_period_secs: u64,
    pub servo_override_angle: u16,
    pub servo_override_secs: u64,
    pub max_line_length: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            banner: "Marvin 1.5".to_string(),
            read_timeout_secs: SERIAL_POLL_PERIOD_SECS,
            boot_delay_secs: 5,
            quiet_period_ms: SERIAL_QUIET_PERIOD_MS,
            reconnect_delay_secs: RECONNECT_DELAY_SECS,
            temperature_period_secs: 60,
            servo_override_angle: 180,
            servo_override_secs: 10,
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

#[derive(Debug, Default)]
struct Requests {
    bell_secs: Option<u32>,
    /// Resting servo angle, taken from the first reading.
    servo: Option<u16>,
    servo_override: Option<(u16, Instant)>,
    temperature: Option<i32>,
}

/// Cloneable handle for other components.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    requests: Arc<Mutex<Requests>>,
    worker: Worker,
}

impl StatusHandle {
    fn lock(&self) -> MutexGuard<'_, Requests> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ring the door bell for `secs` seconds.
    pub fn ring_bell(&self, secs: u32) {
        self.lock().bell_secs = Some(secs);
        self.worker.notify();
    }

    /// Last temperature reported by the board.
    #[must_use]
    pub fn temperature(&self) -> Option<i32> {
        self.lock().temperature
    }

    pub fn kill(&self) {
        self.worker.kill();
    }
}

/// What the board currently shows, as far as the host knows.
#[derive(Debug, Default)]
struct BoardState {
    sign: Option<bool>,
    servo: Option<u16>,
}

pub struct StatusController<O> {
    opener: O,
    config: StatusConfig,
    worker: Worker,
    requests: Arc<Mutex<Requests>>,
    facility: watch::Receiver<FacilityStatus>,
    upstairs_open: bool,
    next_temperature: Instant,
}

impl<O: LinkOpener> StatusController<O> {
    pub fn new(
        opener: O,
        config: StatusConfig,
        facility: watch::Receiver<FacilityStatus>,
        worker: Worker,
    ) -> Self {
        let upstairs_open = facility.borrow().upstairs_open;
        Self {
            opener,
            config,
            worker,
            requests: Arc::default(),
            facility,
            upstairs_open,
            next_temperature: Instant::now(),
        }
    }

    #[must_use]
    pub fn handle(&self) -> StatusHandle {
        StatusHandle {
            requests: Arc::clone(&self.requests),
            worker: self.worker.clone(),
        }
    }

    fn requests(&self) -> MutexGuard<'_, Requests> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run until killed, reconnecting after every failure.
    pub async fn run(mut self) -> Result<()> {
        let device = self.opener.device().to_string();
        loop {
            match self.session().await {
                Err(e) if e.is_cancelled() => break,
                Err(e) => warn!(device = %device, error = %e, "Status link failed"),
                Ok(()) => {}
            }
            debug!(device = %device, "Closed status link");
            if self.worker.delay(self.config.reconnect_delay_secs).await.is_err() {
                break;
            }
        }
        info!(device = %device, "Status controller stopped");
        Ok(())
    }

    async fn session(&mut self) -> Result<()> {
        let mut stream = self.worker.guard(self.opener.open()).await??;
        info!(device = %self.opener.device(), "Opened status link");
        self.worker.delay(self.config.boot_delay_secs).await?;
        wake_link(&mut stream).await?;
        let quiet = Duration::from_millis(self.config.quiet_period_ms);
        self.worker.guard(drain_until_quiet(&mut stream, quiet)).await??;

        let mut framed = Framed::new(
            stream,
            LinesCodec::new_with_max_length(self.config.max_line_length),
        );
        let mut board = BoardState::default();
        loop {
            self.worker.check_kill()?;
            let banner = self.exchange(&mut framed, "?").await?;
            match banner.strip_prefix(self.config.banner.as_str()) {
                Some("+") => {
                    info!("Status board was reset, full resync");
                    board = BoardState::default();
                }
                Some("") => {}
                _ => return Err(LinkError::unexpected_reply("?", &banner)),
            }

            self.sync_sign(&mut framed, &mut board).await?;
            self.sync_servo(&mut framed, &mut board).await?;
            self.sync_temperature(&mut framed).await?;
            self.sync_bell(&mut framed).await?;
            self.idle().await?;
        }
    }

    /// Sleep until a request arrives, the facility changes or a timer is due.
    async fn idle(&mut self) -> Result<()> {
        let now = Instant::now();
        let mut until = self.next_temperature;
        if let Some((_, expiry)) = self.requests().servo_override {
            until = until.min(expiry);
        }
        let timeout = until.saturating_duration_since(now);
        tokio::select! {
            r = self.worker.wait(timeout) => r?,
            _ = self.facility.changed() => {}
        }

        let status = *self.facility.borrow_and_update();
        if status.upstairs_open && !self.upstairs_open {
            let hold = Duration::from_secs(self.config.servo_override_secs);
            self.requests().servo_override =
                Some((self.config.servo_override_angle, Instant::now() + hold));
        }
        self.upstairs_open = status.upstairs_open;
        Ok(())
    }

    async fn exchange<S>(&self, framed: &mut Framed<S, LinesCodec>, command: &str) -> Result<String>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        debug!(cmd = command, "Sending");
        let max = self.config.max_line_length;
        framed.send(command).await.map_err(|e| lines_error(e, max))?;
        let wait = Duration::from_secs(self.config.read_timeout_secs);
        let reply = match tokio::time::timeout(wait, framed.next()).await {
            Err(_) => return Err(LinkError::timeout(command, wait.as_millis() as u64)),
            Ok(None) => return Err(LinkError::Closed),
            Ok(Some(line)) => line.map_err(|e| lines_error(e, max))?,
        };
        let reply = reply.trim_end().to_string();
        debug!(cmd = command, reply = %reply, "Response");
        Ok(reply)
    }

    async fn expect_ok<S>(&self, framed: &mut Framed<S, LinesCodec>, command: &str) -> Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let reply = self.exchange(framed, command).await?;
        if reply == "OK" {
            Ok(())
        } else {
            Err(LinkError::unexpected_reply(command, reply))
        }
    }

    async fn sync_sign<S>(&self, framed: &mut Framed<S, LinesCodec>, board: &mut BoardState) -> Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let open = self.facility.borrow().is_open;
        if board.sign != Some(open) {
            self.expect_ok(framed, if open { "S1" } else { "S0" }).await?;
            board.sign = Some(open);
        }
        Ok(())
    }

    async fn sync_servo<S>(&self, framed: &mut Framed<S, LinesCodec>, board: &mut BoardState) -> Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let current = match board.servo {
            Some(angle) => angle,
            None => {
                let reply = self.exchange(framed, "W").await?;
                let angle = parse_reading(&reply, "ANGLE=")
                    .ok_or_else(|| LinkError::unexpected_reply("W", &reply))?;
                board.servo = Some(angle);
                self.requests().servo.get_or_insert(angle);
                angle
            }
        };

        let target = {
            let mut requests = self.requests();
            if matches!(requests.servo_override, Some((_, until)) if until <= Instant::now()) {
                requests.servo_override = None;
            }
            requests
                .servo_override
                .map(|(angle, _)| angle)
                .or(requests.servo)
                .unwrap_or(current)
        };
        if target != current {
            self.expect_ok(framed, &format!("W{target}")).await?;
            board.servo = Some(target);
        }
        Ok(())
    }

    async fn sync_temperature<S>(&mut self, framed: &mut Framed<S, LinesCodec>) -> Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        if Instant::now() < self.next_temperature {
            return Ok(());
        }
        let reply = self.exchange(framed, "T").await?;
        let celsius: i32 =
            parse_reading(&reply, "TEMP=").ok_or_else(|| LinkError::unexpected_reply("T", &reply))?;
        info!(target: "doorkeep::temperature", celsius, "Temperature");
        self.requests().temperature = Some(celsius);
        self.next_temperature =
            Instant::now() + Duration::from_secs(self.config.temperature_period_secs);
        Ok(())
    }

    async fn sync_bell<S>(&self, framed: &mut Framed<S, LinesCodec>) -> Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let bell = self.requests().bell_secs;
        if let Some(secs) = bell {
            self.expect_ok(framed, &format!("B{secs}")).await?;
            self.requests().bell_secs = None;
        }
        Ok(())
    }
}

fn parse_reading<T: std::str::FromStr>(reply: &str, prefix: &str) -> Option<T> {
    reply.strip_prefix(prefix)?.trim().parse().ok()
}

fn lines_error(e: LinesCodecError, max: usize) -> LinkError {
    match e {
        LinesCodecError::Io(e) => LinkError::Io(e),
        LinesCodecError::MaxLineLengthExceeded => {
            LinkError::Protocol(ProtocolError::LineTooLong { len: max + 1, max })
        }
    }
}
