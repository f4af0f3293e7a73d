//! Serial TTL trigger box support.
//!
//! The DLP-IO8-G exposes eight digital output lines. Writing the ASCII digit
//! `'1'`..`'8'` drives the matching line high, and each digit has a fixed
//! letter that drives it low again.

use std::{
    io::{self, Read, Write},
    thread,
    time::Duration,
};

use crate::{PresenterError, Result};

/// Liveness check byte.
pub const PING: u8 = 0x27;
/// Expected reply to [`PING`].
pub const PING_ACK: u8 = b'Q';
/// Switches the box into binary reporting mode; no reply is sent.
pub const BINARY_MODE: u8 = 0x5C;
/// Command that makes the box report the state of all eight lines.
pub const READ_LINES: &[u8; 8] = b"ASDFGHJK";
/// Deassert command for lines `1` to `8`.
pub const UNSET_CODES: [u8; 8] = *b"QWERTYUI";

pub const DEFAULT_BAUD: u32 = 9600;
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Width of the pulse sent for sound onsets, in milliseconds.
pub const PULSE_MS: u64 = 5;

/// Maps a line-set byte to its deassert command. Bytes outside `'1'..='8'`
/// are returned unchanged.
pub fn deassert_code(byte: u8) -> u8 {
    match byte {
        b'1'..=b'8' => UNSET_CODES[(byte - b'1') as usize],
        other => other,
    }
}

/// Outbound marker device. Implemented by the serial driver; a non-blocking
/// driver can be substituted without touching the scheduler.
pub trait TriggerDevice {
    fn ping(&mut self) -> bool;
    /// Raises each line named by an ASCII digit in `lines`.
    fn set(&mut self, lines: &str) -> Result<()>;
    fn unset(&mut self, lines: &str) -> Result<()>;
    /// Blocks the caller for `ms` milliseconds.
    fn delay(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Byte stream a trigger box is attached through.
pub trait SerialLink: Read + Write {
    /// Discards bytes received but not yet read.
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for Box<dyn serialport::SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Driver for a DLP-IO8-G attached through any [`SerialLink`].
#[derive(Debug)]
pub struct Dlp8<P> {
    port: P,
}

impl<P: SerialLink> Dlp8<P> {
    /// Performs the ping handshake and switches the box to binary mode.
    pub fn open(port: P) -> Result<Self> {
        let mut device = Self { port };
        if !device.ping() {
            return Err(PresenterError::Trigger(
                "device did not answer the ping handshake".into(),
            ));
        }
        device.write_all(&[BINARY_MODE])?;
        Ok(device)
    }

    /// Queries the eight line states. Returns one byte per line as reported
    /// by the box. Stale input is dropped first so it cannot shift the reply.
    pub fn read_lines(&mut self) -> Result<[u8; 8]> {
        self.clear_input()?;
        self.write_all(READ_LINES)?;
        let mut states = [0u8; 8];
        self.port
            .read_exact(&mut states)
            .map_err(|err| PresenterError::Trigger(format!("reading line states: {err}")))?;
        Ok(states)
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port
            .clear_input()
            .map_err(|err| PresenterError::Trigger(format!("clearing input: {err}")))
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.port
            .write_all(bytes)
            .and_then(|()| self.port.flush())
            .map_err(|err| PresenterError::Trigger(format!("write failed: {err}")))
    }
}

impl Dlp8<Box<dyn serialport::SerialPort>> {
    /// Opens `path` at `baud` with 8N1 framing and no flow control.
    pub fn open_serial(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()?;
        let device = Self::open(port)?;
        tracing::info!(path, baud, "trigger device ready");
        Ok(device)
    }
}

impl<P: SerialLink> TriggerDevice for Dlp8<P> {
    fn ping(&mut self) -> bool {
        if self.clear_input().and_then(|()| self.write_all(&[PING])).is_err() {
            return false;
        }
        let mut reply = [0u8; 1];
        match self.port.read_exact(&mut reply) {
            Ok(()) => reply[0] == PING_ACK,
            Err(err) => {
                tracing::debug!("no ping reply: {err}");
                false
            }
        }
    }

    fn set(&mut self, lines: &str) -> Result<()> {
        self.write_all(lines.as_bytes())
    }

    fn unset(&mut self, lines: &str) -> Result<()> {
        let codes: Vec<u8> = lines.bytes().map(deassert_code).collect();
        self.write_all(&codes)
    }
}
