//! Door lock controller worker.
//!
//! ```text
//! Disconnected --open, drain--> Enumerating --keys in sync--> Synced
//!      ^                                                        |
//!      +------------- any I/O, checksum or ack failure ---------+
//! ```
//!
//! Enumeration assigns the address, checks liveness and compares the
//! on-device key hash with the hash of the assigned key list, re-uploading
//! every key on mismatch. The first drain of the event log after an
//! enumeration is backlog: entries are logged and door states applied, but
//! no presence signal or remote open comes out of it.
//!
//! While synced the worker waits for unsolicited lines. `E` triggers a ping
//! and a drain, `Y` feeds the keypad buffer. With no traffic at all a ping is
//! still sent once per ping interval so a dead link is noticed.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Local;
use doorkeep_access::{AccessPolicy, Credential, KeySink, Notifier, Presence};
use doorkeep_core::constants::{
    KEY_FORCE_CLOSE, KEY_OVERRIDE, KEYPAD_BUFFER_LIFETIME_SECS, MAX_LINE_LENGTH, OTP_PREFIX,
    RECONNECT_DELAY_SECS, SERIAL_PING_INTERVAL_SECS, SERIAL_POLL_PERIOD_SECS,
    SERIAL_QUIET_PERIOD_MS,
};
use doorkeep_core::{Door, FacilityState, KeyRecord};
use doorkeep_protocol::{Command, Inbound, KeyHash, LockCodec, LogAction, LogEntry, TimeCode};
use doorkeep_runtime::Worker;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::error::{LinkError, Result};
use crate::keypad::KeypadBuffer;
use crate::link::{LinkOpener, drain_until_quiet, wake_link};
use crate::status::StatusHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Enumerating,
    Synced,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Enumerating => "enumerating",
            LinkState::Synced => "synced",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Timeout for one reply, and the idle poll period.
    pub read_timeout_secs: u64,
    /// Ping a silent link this often.
    pub ping_interval_secs: u64,
    pub quiet_period_ms: u64,
    pub reconnect_delay_secs: u64,
    pub keypad_lifetime_secs: u64,
    /// Bell duration when the override key is refused.
    pub bell_secs: u32,
    pub max_line_length: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: SERIAL_POLL_PERIOD_SECS,
            ping_interval_secs: SERIAL_PING_INTERVAL_SECS,
            quiet_period_ms: SERIAL_QUIET_PERIOD_MS,
            reconnect_delay_secs: RECONNECT_DELAY_SECS,
            keypad_lifetime_secs: KEYPAD_BUFFER_LIFETIME_SECS,
            bell_secs: 2,
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

/// Collaborators a lock controller reports to.
#[derive(Clone)]
pub struct LockContext {
    pub facility: Arc<FacilityState>,
    pub policy: Arc<AccessPolicy>,
    pub presence: Arc<dyn Presence>,
    pub notifier: Arc<dyn Notifier>,
    pub bell: Option<StatusHandle>,
}

#[derive(Debug, Default)]
struct Assignment {
    keys: Option<Arc<[KeyRecord]>>,
    generation: u64,
    /// Generation the device was last synced to on the current link.
    synced: Option<u64>,
}

#[derive(Debug)]
struct Shared {
    assignment: Mutex<Assignment>,
    state: watch::Sender<LinkState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Assignment> {
        self.assignment.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: LinkState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }
}

/// Cloneable handle to a running [`LockController`].
#[derive(Debug, Clone)]
pub struct LockHandle {
    door: Door,
    shared: Arc<Shared>,
    worker: Worker,
}

impl LockHandle {
    #[must_use]
    pub fn door(&self) -> Door {
        self.door
    }

    /// Assign a new key list. The controller re-enumerates and uploads it
    /// if the device holds something else.
    pub fn assign_keys(&self, keys: Vec<KeyRecord>) {
        {
            let mut assignment = self.shared.lock();
            assignment.keys = Some(keys.into());
            assignment.generation += 1;
        }
        self.worker.notify();
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }

    pub fn kill(&self) {
        self.worker.kill();
    }
}

impl KeySink for LockHandle {
    fn set_keys(&self, keys: Vec<KeyRecord>) {
        self.assign_keys(keys);
    }
}

/// An open, drained link with the codec on top.
struct Link<S> {
    framed: Framed<S, LockCodec>,
    door: Door,
    read_timeout: Duration,
    event_pending: bool,
    keystrokes: VecDeque<char>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Link<S> {
    /// Send `command` and return the payload of its reply.
    ///
    /// Unsolicited lines arriving meanwhile are remembered, not dropped.
    async fn exchange(&mut self, command: Command) -> Result<String> {
        trace!(door = %self.door, cmd = %command, "Sending");
        self.framed.send(command.clone()).await?;
        loop {
            let line = match tokio::time::timeout(self.read_timeout, self.framed.next()).await {
                Err(_) => {
                    return Err(LinkError::timeout(&command, self.read_timeout.as_millis() as u64));
                }
                Ok(None) => return Err(LinkError::Closed),
                Ok(Some(line)) => line?,
            };
            match line {
                Inbound::Response(text) => {
                    trace!(door = %self.door, cmd = %command, reply = %text, "Response");
                    return command
                        .reply_payload(&text)
                        .map(str::to_string)
                        .map_err(|_| LinkError::unexpected_reply(&command, &text));
                }
                Inbound::EventPending => self.event_pending = true,
                Inbound::Keypad(key) => self.keystrokes.push_back(key),
            }
        }
    }

    /// Wait for one unsolicited line, a notification or the poll timeout.
    async fn poll(&mut self, worker: &Worker) -> Result<()> {
        let read_timeout = self.read_timeout;
        let framed = &mut self.framed;
        let line = worker
            .guard(async {
                tokio::select! {
                    _ = worker.notified() => None,
                    line = tokio::time::timeout(read_timeout, framed.next()) => line.ok(),
                }
            })
            .await?;
        match line {
            None => Ok(()),
            Some(None) => Err(LinkError::Closed),
            Some(Some(line)) => match line? {
                Inbound::Response(text) => Err(LinkError::Unsolicited(text)),
                Inbound::EventPending => {
                    self.event_pending = true;
                    Ok(())
                }
                Inbound::Keypad(key) => {
                    self.keystrokes.push_back(key);
                    Ok(())
                }
            },
        }
    }
}

pub struct LockController<O> {
    door: Door,
    opener: O,
    config: LockConfig,
    ctx: LockContext,
    shared: Arc<Shared>,
    worker: Worker,
    keypad: KeypadBuffer,
    remote_open: bool,
}

impl<O: LinkOpener> LockController<O> {
    pub fn new(door: Door, opener: O, config: LockConfig, ctx: LockContext, worker: Worker) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let keypad = KeypadBuffer::new(Duration::from_secs(config.keypad_lifetime_secs));
        Self {
            door,
            opener,
            config,
            ctx,
            shared: Arc::new(Shared {
                assignment: Mutex::default(),
                state,
            }),
            worker,
            keypad,
            remote_open: false,
        }
    }

    #[must_use]
    pub fn handle(&self) -> LockHandle {
        LockHandle {
            door: self.door,
            shared: Arc::clone(&self.shared),
            worker: self.worker.clone(),
        }
    }

    /// Run until killed, reconnecting after every failure.
    pub async fn run(mut self) -> Result<()> {
        loop {
            match self.session().await {
                Err(e) if e.is_cancelled() => break,
                Err(e) => warn!(door = %self.door, error = %e, "Lock link failed"),
                Ok(()) => {}
            }
            self.disconnect();
            if self.worker.delay(self.config.reconnect_delay_secs).await.is_err() {
                break;
            }
        }
        self.disconnect();
        info!(door = %self.door, "Lock controller stopped");
        Ok(())
    }

    /// Forget everything tied to the link that just went away.
    fn disconnect(&mut self) {
        self.shared.lock().synced = None;
        self.shared.set_state(LinkState::Disconnected);
        self.remote_open = false;
        self.keypad.clear();
    }

    async fn wait_for_keys(&self) -> Result<()> {
        loop {
            let assigned = self.shared.lock().keys.is_some();
            if assigned {
                return Ok(());
            }
            self.worker
                .wait(Duration::from_secs(self.config.read_timeout_secs))
                .await?;
        }
    }

    fn needs_enumeration(&self) -> bool {
        let assignment = self.shared.lock();
        assignment.synced != Some(assignment.generation)
    }

    async fn session(&mut self) -> Result<()> {
        self.wait_for_keys().await?;
        let mut stream = self.worker.guard(self.opener.open()).await??;
        info!(door = %self.door, device = %self.opener.device(), "Opened lock link");
        wake_link(&mut stream).await?;
        let quiet = Duration::from_millis(self.config.quiet_period_ms);
        let discarded = self.worker.guard(drain_until_quiet(&mut stream, quiet)).await??;
        debug!(door = %self.door, discarded, "Link drained");

        let mut link = Link {
            framed: Framed::new(stream, LockCodec::with_max_line_length(self.config.max_line_length)),
            door: self.door,
            read_timeout: Duration::from_secs(self.config.read_timeout_secs),
            event_pending: false,
            keystrokes: VecDeque::new(),
        };
        let ping_interval = Duration::from_secs(self.config.ping_interval_secs);
        let mut flush_backlog = true;
        let mut drain_due = true;
        let mut ping_due = false;
        let mut last_drain = Instant::now();

        loop {
            self.worker.check_kill()?;

            if self.needs_enumeration() {
                self.enumerate(&mut link).await?;
                flush_backlog = true;
                drain_due = true;
                ping_due = false;
                continue;
            }

            if std::mem::take(&mut link.event_pending) {
                ping_due = true;
                drain_due = true;
            }
            if std::mem::take(&mut ping_due) {
                link.exchange(Command::Ping(TimeCode::now())).await?;
            }
            if std::mem::take(&mut drain_due) {
                self.drain_events(&mut link, flush_backlog).await?;
                flush_backlog = false;
                last_drain = Instant::now();
            }

            while let Some(key) = link.keystrokes.pop_front() {
                self.handle_key(key);
            }

            if std::mem::take(&mut self.remote_open) {
                link.exchange(Command::RemoteOpen).await?;
                info!(door = %self.door, "Remote open");
            }

            if self.keypad.expire(Instant::now()) {
                debug!(door = %self.door, "Keypad buffer expired");
            }

            if link.event_pending || !link.keystrokes.is_empty() {
                continue;
            }
            link.poll(&self.worker).await?;
            if last_drain.elapsed() >= ping_interval {
                trace!(door = %self.door, "Watchdog ping");
                ping_due = true;
                drain_due = true;
            }
        }
    }

    async fn enumerate<S: AsyncRead + AsyncWrite + Unpin>(&mut self, link: &mut Link<S>) -> Result<()> {
        self.shared.set_state(LinkState::Enumerating);
        let (keys, generation) = {
            let assignment = self.shared.lock();
            (assignment.keys.clone().unwrap_or_default(), assignment.generation)
        };

        link.exchange(Command::Address).await?;
        link.exchange(Command::Ping(TimeCode::now())).await?;
        let reported = link.exchange(Command::QueryKeyHash).await?;
        let expected = KeyHash::of(&keys);
        if reported.parse::<KeyHash>().ok() == Some(expected) {
            debug!(door = %self.door, hash = %expected, "Key hash matches");
        } else {
            info!(
                door = %self.door,
                device = %reported,
                expected = %expected,
                keys = keys.len(),
                "Uploading keys"
            );
            link.exchange(Command::ResetKeys).await?;
            for key in keys.iter() {
                link.exchange(Command::AddKey(key.clone())).await?;
            }
        }

        let current = {
            let mut assignment = self.shared.lock();
            let current = assignment.generation == generation;
            if current {
                assignment.synced = Some(generation);
            }
            current
        };
        if current {
            self.shared.set_state(LinkState::Synced);
            info!(door = %self.door, keys = keys.len(), hash = %expected, "Synced");
        } else {
            debug!(door = %self.door, "Key list changed during enumeration");
        }
        Ok(())
    }

    /// Fetch and consume log entries until the device reports none left.
    async fn drain_events<S: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        link: &mut Link<S>,
        flush_backlog: bool,
    ) -> Result<()> {
        loop {
            let payload = link.exchange(Command::NextEvent).await?;
            if payload.is_empty() {
                return Ok(());
            }
            let entry = LogEntry::parse(&payload)?;
            self.handle_entry(&entry, flush_backlog);
            link.exchange(Command::ClearEvent).await?;
        }
    }

    fn handle_entry(&mut self, entry: &LogEntry, flush_backlog: bool) {
        info!(
            target: "doorkeep::security",
            door = %self.door,
            action = %entry.action,
            tag = %entry.tag,
            at = ?entry.timestamp(),
            backlog = flush_backlog,
            "Log entry"
        );
        match entry.action {
            LogAction::Opened => self.door_changed(true),
            LogAction::Closed => self.door_changed(false),
            _ if flush_backlog => {}
            LogAction::Unlocked => self.ctx.presence.mark_in(&entry.tag),
            LogAction::TagOut => self.ctx.presence.mark_out(&entry.tag),
            action if action.wants_host_decision() => {
                let snapshot = self.ctx.facility.snapshot();
                let credential = Credential::Tag(&entry.tag);
                if self.ctx.policy.decide(credential, &snapshot, Local::now()) {
                    info!(door = %self.door, tag = %entry.tag, "Host granted access");
                    self.ctx.presence.mark_in(&entry.tag);
                    self.remote_open = true;
                }
            }
            _ => {}
        }
    }

    fn door_changed(&self, open: bool) {
        if !self.ctx.facility.set_door_state(self.door, open) {
            return;
        }
        if self.door == Door::Upstairs && !self.ctx.facility.is_open() {
            let text = if open { "Internal door open" } else { "Internal door closed" };
            self.ctx.notifier.announce(text);
        }
        self.ctx.presence.refresh();
    }

    fn handle_key(&mut self, key: char) {
        if self.keypad.expire(Instant::now()) {
            debug!(door = %self.door, "Keypad buffer expired");
        }
        if key == KEY_FORCE_CLOSE {
            info!(door = %self.door, "Force-close requested");
            self.ctx.presence.force_close(self.door);
        } else if key != KEY_OVERRIDE {
            self.keypad.push(key, Instant::now());
        }

        let token = format!("{OTP_PREFIX}{key}");
        let credential = Credential::from_token(&token, self.keypad.as_str());
        let snapshot = self.ctx.facility.snapshot();
        if self.ctx.policy.decide(credential, &snapshot, Local::now()) {
            info!(door = %self.door, "Keypad entry accepted");
            self.remote_open = true;
        } else if key == KEY_OVERRIDE {
            if let Some(bell) = &self.ctx.bell {
                bell.ring_bell(self.config.bell_secs);
            }
        }
    }
}
