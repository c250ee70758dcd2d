//! Shared fixtures for the lock controller scenarios.
//!
//! [`Firmware`] plays the lock controller on the device end of a
//! `tokio::io::duplex` pipe. It speaks the real checksummed protocol, keeps
//! its key list and event log across reconnects, and reports every command
//! it answers on a channel as `command>reply` so tests can wait for them.
//!
//! [`Harness`] wires a [`LockController`] to a firmware instance, an
//! in-memory access policy and a presence recorder.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use doorkeep_access::{AccessPolicy, ChannelNotifier, MemoryOtpStore, PolicyConfig, Presence};
use doorkeep_controller::{
    LinkError, LinkState, LockConfig, LockContext, LockController, LockHandle, QueuedOpener,
    StatusConfig, StatusController, StatusHandle,
};
use doorkeep_core::{AccessLevel, Door, FacilityState, KeyRecord, Roster, Tag};
use doorkeep_protocol::{KeyHash, TimeCode, decode_line, encode_frame};
use doorkeep_runtime::Worker;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};

pub const MEMBER: &str = "ABCD1234";
pub const MEMBER_KEY: &str = "ABCD1234 1234";

/// Upper bound for any single wait, in paused test time.
pub const PATIENCE: Duration = Duration::from_secs(600);

#[derive(Debug, Default)]
pub struct FirmwareState {
    pub keys: Vec<String>,
    pub log: VecDeque<String>,
    pub commands: Vec<String>,
    /// Number of upcoming replies sent with a broken checksum.
    pub corrupt_replies: usize,
    /// Break the checksum of the next reply to a command with this prefix.
    pub corrupt_command: Option<String>,
}

#[derive(Clone)]
pub struct Firmware {
    pub state: Arc<Mutex<FirmwareState>>,
    commands: UnboundedSender<String>,
    unsolicited: Arc<Mutex<Option<UnboundedSender<String>>>>,
}

impl Firmware {
    pub fn new(keys: &[&str]) -> (Self, UnboundedReceiver<String>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let state = FirmwareState {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            ..FirmwareState::default()
        };
        let firmware = Self {
            state: Arc::new(Mutex::new(state)),
            commands,
            unsolicited: Arc::default(),
        };
        (firmware, rx)
    }

    /// Serve one link until the host hangs up.
    pub fn attach(&self, mut stream: DuplexStream) -> JoinHandle<()> {
        let (tx, mut unsolicited) = mpsc::unbounded_channel::<String>();
        *self.unsolicited.lock().unwrap() = Some(tx);
        let firmware = self.clone();
        tokio::spawn(async move {
            // Boot chatter the host must discard
            stream.write_all(b"# lock v2 ready\njunk").await.unwrap();
            let mut framed = Framed::new(stream, LinesCodec::new());
            loop {
                tokio::select! {
                    line = framed.next() => {
                        let Some(Ok(line)) = line else { break };
                        let Ok(Some(command)) = decode_line(line.as_bytes()) else { continue };
                        let reply = firmware.respond(&command);
                        if framed.send(reply).await.is_err() {
                            break;
                        }
                    }
                    Some(text) = unsolicited.recv() => {
                        let wire = encode_frame(&text);
                        if framed.send(wire.trim_end()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    fn respond(&self, command: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.to_string());

        let (head, arg) = command.split_at(2.min(command.len()));
        let reply = match head {
            "S0" => "S1".to_string(),
            "P0" => format!("P1{arg}"),
            "K0" => format!("H0{}", key_hash(&state.keys)),
            "R0" => {
                state.keys.clear();
                "A0".to_string()
            }
            "N0" => {
                state.keys.push(arg.to_string());
                "A0".to_string()
            }
            "G0" => format!("V0{}", state.log.front().cloned().unwrap_or_default()),
            "C0" => {
                state.log.pop_front();
                "A0".to_string()
            }
            "U0" => "A0".to_string(),
            _ => "#?".to_string(),
        };

        let _ = self.commands.send(format!("{command}>{reply}"));
        let mut wire = encode_frame(&reply).trim_end().to_string();
        let targeted = state
            .corrupt_command
            .as_deref()
            .is_some_and(|prefix| command.starts_with(prefix));
        let corrupt = if targeted {
            state.corrupt_command = None;
            true
        } else if state.corrupt_replies > 0 {
            state.corrupt_replies -= 1;
            true
        } else {
            false
        };
        if corrupt {
            let last = wire.pop().unwrap();
            wire.push(if last == '0' { '1' } else { '0' });
        }
        wire
    }

    /// Queue a log entry and tell the host about it.
    pub fn push_event(&self, action: char, tag: &str) {
        let entry = format!("{}{action}{tag}", TimeCode::from_secs(1_000).as_str());
        self.state.lock().unwrap().log.push_back(entry);
        self.send_line("E0");
    }

    pub fn press(&self, key: char) {
        self.send_line(&format!("Y0{key}"));
    }

    pub fn send_line(&self, text: &str) {
        if let Some(tx) = self.unsolicited.lock().unwrap().as_ref() {
            let _ = tx.send(text.to_string());
        }
    }

    pub fn count(&self, command: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|c| c.starts_with(command))
            .count()
    }
}

pub fn key_hash(keys: &[String]) -> KeyHash {
    let records: Vec<KeyRecord> = keys
        .iter()
        .map(|k| {
            let (id, pin) = k.split_once(' ').unwrap();
            KeyRecord::for_tag(&Tag::new(id, pin, AccessLevel::Both).unwrap())
        })
        .collect();
    KeyHash::of(&records)
}

/// Consume reports until one starting with `prefix` arrives.
pub async fn wait_for_command(rx: &mut UnboundedReceiver<String>, prefix: &str) -> String {
    tokio::time::timeout(PATIENCE, async {
        loop {
            let command = rx.recv().await.expect("firmware gone");
            if command.starts_with(prefix) {
                return command;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {prefix} command"))
}

pub async fn wait_for_state(handle: &LockHandle, state: LinkState) {
    let mut rx = handle.subscribe();
    tokio::time::timeout(PATIENCE, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("never reached {state}"))
        .unwrap();
}

/// Poll `cond` every 100ms until it holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(PATIENCE, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Records presence signals as `in:ID`, `out:ID`, `force:DOOR`, `refresh`.
#[derive(Default)]
pub struct RecordingPresence {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingPresence {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn saw(&self, call: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == call)
    }
}

impl Presence for RecordingPresence {
    fn mark_in(&self, id: &str) {
        self.calls.lock().unwrap().push(format!("in:{id}"));
    }

    fn mark_out(&self, id: &str) {
        self.calls.lock().unwrap().push(format!("out:{id}"));
    }

    fn force_close(&self, door: Door) {
        self.calls.lock().unwrap().push(format!("force:{door}"));
    }

    fn refresh(&self) {
        self.calls.lock().unwrap().push("refresh".to_string());
    }
}

/// Plays the status board: answers every line and reports it on a channel.
pub fn attach_status_board(stream: DuplexStream) -> UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut framed = Framed::new(stream, LinesCodec::new());
        while let Some(Ok(line)) = framed.next().await {
            let reply = match line.as_str() {
                "X" => continue,
                "?" => "Marvin 1.5",
                "W" => "ANGLE=90",
                "T" => "TEMP=21",
                _ => "OK",
            };
            let _ = tx.send(line);
            if framed.send(reply).await.is_err() {
                break;
            }
        }
    });
    rx
}

#[derive(Debug, Default)]
pub struct Options {
    pub policy: PolicyConfig,
    /// Run a status controller against a fake board and ring its bell.
    pub status_board: bool,
}

pub struct Harness {
    pub firmware: Firmware,
    pub commands: UnboundedReceiver<String>,
    pub facility: Arc<FacilityState>,
    pub presence: Arc<RecordingPresence>,
    pub otp: Arc<MemoryOtpStore>,
    pub announcements: UnboundedReceiver<String>,
    pub handle: LockHandle,
    pub streams: UnboundedSender<DuplexStream>,
    pub task: JoinHandle<Result<(), LinkError>>,
    /// Lines the status board received, when one runs.
    pub board: Option<UnboundedReceiver<String>>,
    status: Option<StatusHandle>,
}

impl Harness {
    /// Upstairs controller whose device holds `device_keys`, with the
    /// member in the roster. Nothing is assigned or connected yet.
    pub fn start(device_keys: &[&str]) -> Self {
        Self::start_with(device_keys, Options::default())
    }

    pub fn start_with(device_keys: &[&str], options: Options) -> Self {
        let (firmware, commands) = Firmware::new(device_keys);
        let roster = Roster::new(vec![Tag::new(MEMBER, "1234", AccessLevel::Both).unwrap()]);
        let facility = Arc::new(FacilityState::with_roster(roster));
        let presence = Arc::new(RecordingPresence::default());
        let otp = Arc::new(MemoryOtpStore::new());
        let (notifier, announcements) = ChannelNotifier::new();
        let policy = AccessPolicy::new(options.policy, otp.clone());

        let (status, board) = if options.status_board {
            let (opener, boards) = QueuedOpener::new("aux");
            let (host, device) = tokio::io::duplex(1024);
            let board = attach_status_board(device);
            boards.send(host).unwrap();
            let controller = StatusController::new(
                opener,
                StatusConfig::default(),
                facility.subscribe(),
                Worker::new("status"),
            );
            let handle = controller.handle();
            tokio::spawn(controller.run());
            (Some(handle), Some(board))
        } else {
            (None, None)
        };

        let ctx = LockContext {
            facility: Arc::clone(&facility),
            policy: Arc::new(policy),
            presence: presence.clone(),
            notifier: Arc::new(notifier),
            bell: status.clone(),
        };
        let (opener, streams) = QueuedOpener::new("door_up");
        let controller = LockController::new(
            Door::Upstairs,
            opener,
            LockConfig::default(),
            ctx,
            Worker::new("door_up"),
        );
        let handle = controller.handle();
        let task = tokio::spawn(controller.run());

        Self {
            firmware,
            commands,
            facility,
            presence,
            otp,
            announcements,
            handle,
            streams,
            task,
            board,
            status,
        }
    }

    /// Hand the controller a fresh link to the same firmware.
    pub fn connect(&self) -> JoinHandle<()> {
        let (host, device) = tokio::io::duplex(4096);
        let served = self.firmware.attach(device);
        self.streams.send(host).unwrap();
        served
    }

    pub fn assign_member_key(&self) {
        let tag = Tag::new(MEMBER, "1234", AccessLevel::Both).unwrap();
        self.handle.assign_keys(vec![KeyRecord::for_tag(&tag)]);
    }

    /// Assign the member key, connect and wait for the backlog drain to end.
    pub async fn synced(device_keys: &[&str]) -> Self {
        Self::synced_with(device_keys, Options::default()).await
    }

    pub async fn synced_with(device_keys: &[&str], options: Options) -> Self {
        let mut harness = Self::start_with(device_keys, options);
        harness.assign_member_key();
        harness.connect();
        wait_for_state(&harness.handle, LinkState::Synced).await;
        harness.wait_drained().await;
        harness
    }

    /// Wait for a `G0` answered with an empty log.
    pub async fn wait_drained(&mut self) {
        while wait_for_command(&mut self.commands, "G0").await != "G0>V0" {}
    }

    pub fn open_facility(&self) {
        self.facility.apply_presence(Some(MEMBER), false);
        assert!(self.facility.is_open());
    }

    pub fn add_secret(&self, secret: &str) {
        self.otp
            .insert(secret, Utc::now() + chrono::Duration::hours(1));
    }

    /// Consume status board lines until `line` arrives.
    pub async fn wait_for_board(&mut self, line: &str) {
        let board = self.board.as_mut().expect("no status board");
        tokio::time::timeout(PATIENCE, async {
            while board.recv().await.expect("board gone") != line {}
        })
        .await
        .unwrap_or_else(|_| panic!("board never saw {line}"));
    }

    pub async fn stop(self) {
        if let Some(status) = &self.status {
            status.kill();
        }
        self.handle.kill();
        let result = tokio::time::timeout(PATIENCE, self.task)
            .await
            .expect("controller did not stop");
        assert!(result.unwrap().is_ok());
    }
}
