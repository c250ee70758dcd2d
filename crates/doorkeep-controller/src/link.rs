//! Opening and preparing the byte stream to a controller.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use doorkeep_core::constants::SERIAL_BAUD_RATE;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, trace};

use crate::error::{LinkError, Result};

/// Produces a fresh stream every time a worker (re)connects.
pub trait LinkOpener: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Human-readable device name for logs.
    fn device(&self) -> &str;

    fn open(&self) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// A serial port at 9600 8N1 without flow control.
#[derive(Debug, Clone)]
pub struct SerialOpener {
    path: PathBuf,
    device: String,
    baud_rate: u32,
}

impl SerialOpener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let device = path.display().to_string();
        Self {
            path,
            device,
            baud_rate: SERIAL_BAUD_RATE,
        }
    }

    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

impl LinkOpener for SerialOpener {
    type Stream = SerialStream;

    fn device(&self) -> &str {
        &self.device
    }

    async fn open(&self) -> Result<SerialStream> {
        debug!(device = %self.device, baud = self.baud_rate, "Opening serial port");
        tokio_serial::new(self.path.to_string_lossy(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| LinkError::open(&self.device, e))
    }
}

/// Hands out streams pushed through a channel, one per `open`.
///
/// Used for simulators and tests. `open` waits until a stream is queued and
/// fails once every sender is gone.
#[derive(Debug)]
pub struct QueuedOpener<S> {
    device: String,
    streams: Mutex<mpsc::UnboundedReceiver<S>>,
}

impl<S> QueuedOpener<S> {
    pub fn new(device: impl Into<String>) -> (Self, mpsc::UnboundedSender<S>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let opener = Self {
            device: device.into(),
            streams: Mutex::new(rx),
        };
        (opener, tx)
    }
}

impl<S> LinkOpener for QueuedOpener<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Stream = S;

    fn device(&self) -> &str {
        &self.device
    }

    async fn open(&self) -> Result<S> {
        self.streams
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| LinkError::open(&self.device, "no more streams"))
    }
}

/// Write a bare `X` line. Firmware treats it as noise and resets its line
/// buffer, so the first real command is not glued to leftover input.
pub async fn wake_link<S: AsyncWrite + Unpin>(stream: &mut S) -> Result<()> {
    stream.write_all(b"X\n").await?;
    stream.flush().await?;
    Ok(())
}

/// Read and discard input until nothing arrives for `quiet`.
///
/// Returns the number of bytes thrown away.
pub async fn drain_until_quiet<S: AsyncRead + Unpin>(stream: &mut S, quiet: Duration) -> Result<usize> {
    let mut buf = [0u8; 256];
    let mut discarded = 0;
    loop {
        match tokio::time::timeout(quiet, stream.read(&mut buf)).await {
            Err(_) => {
                trace!(discarded, "Link quiet");
                return Ok(discarded);
            }
            Ok(Ok(0)) => return Err(LinkError::Closed),
            Ok(Ok(n)) => discarded += n,
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}
