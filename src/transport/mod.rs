//!
//! Owns the physical serial port: connection (with candidate-path probing),
//! the I/O thread that shuttles outbound frames onto the wire and inbound
//! bytes off it, framing via [`crate::protocol::FrameDecoder`], and
//! reconnection whenever the link is lost.
//!

pub mod error;

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::SerialSettings;
use crate::protocol::FrameDecoder;
use error::TransportError;

/// Capacity of both the outbound command queue and the inbound frame queue, per spec §9.
pub const QUEUE_CAPACITY: usize = 20;

/// A fully-encoded outbound frame, already length-prefixed and checksummed by `protocol::OutboundCommand::encode`.
pub type OutboundQueue = SyncSender<Vec<u8>>;

/// Candidate serial device paths tried before `device_path`, mirroring
/// `examples/original_source/scripts/motor.py`'s `search_for_port`.
pub const DEFAULT_CANDIDATE_PATHS: &[&str] =
    &["/dev/ttyACM0", "/dev/ttyACM1", "/dev/ttyACM2", "/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyUSB2"];

/// Pause between reconnect attempts once the link is lost, matching `motor.py connect_serial_port`'s `time.sleep(1)`.
const RECONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Pacing sleep between I/O loop iterations, per spec §5 ("avoid pegging a core").
const IO_LOOP_SLEEP: Duration = Duration::from_micros(100);

/// Bounded write/wait handshake run against each candidate port before it is accepted.
///
/// Optional: most deployments don't have a connect-time identity frame wired
/// into their device firmware, so a `SerialTransport` with `probe: None`
/// accepts the first port it can open at the configured baud rate.
#[derive(Clone)]
pub struct WhoAmIProbe {
    pub request: Vec<u8>,
    pub expected_message_id: u8,
    pub attempts: u8,
    pub attempt_wait: Duration,
}

/// Join handle, shutdown switch, and live connection state for the background I/O thread.
pub struct TransportHandle {
    shutdown: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TransportHandle {
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// Whether the I/O thread currently holds an open port (false while reconnecting).
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

///
/// Opens a serial connection, trying `device_path` (if given) then each of
/// `DEFAULT_CANDIDATE_PATHS`, and spawns the I/O thread. The I/O thread
/// re-enters this same candidate-path search whenever a read or write error
/// is observed, per spec §4.2.
///
/// # Parameters:
/// - `settings`: baud rate and framing bytes
/// - `device_path`: a caller-preferred path, tried first
/// - `probe`: an optional connect-time identity handshake
/// - `outbound_rx`: frames to write to the wire, already encoded
/// - `inbound_tx`: decoded frame payloads (message id .. ETX inclusive); full queue drops the newest frame
///
/// # Returns:
/// - A `TransportHandle` to later `stop()` the I/O thread or poll `is_connected()`
/// - `TransportError::NoPortFound` if every candidate path failed to open or failed its probe
///
pub fn connect(
    settings: SerialSettings,
    device_path: Option<String>,
    probe: Option<WhoAmIProbe>,
    outbound_rx: Receiver<Vec<u8>>,
    inbound_tx: SyncSender<Vec<u8>>,
) -> Result<TransportHandle, TransportError> {
    let port = open_first_responding_port(&settings, device_path.clone(), &probe)?;
    let shutdown = Arc::new(AtomicBool::new(false));
    let connected = Arc::new(AtomicBool::new(true));
    let thread_shutdown = Arc::clone(&shutdown);
    let thread_connected = Arc::clone(&connected);

    let thread = thread::spawn(move || {
        io_loop(port, settings, device_path, probe, outbound_rx, inbound_tx, thread_shutdown, thread_connected);
    });

    Ok(TransportHandle { shutdown, connected, thread: Some(thread) })
}

fn candidate_paths(device_path: &Option<String>) -> Vec<String> {
    let mut paths = Vec::new();
    if let Some(p) = device_path {
        paths.push(p.clone());
    }
    for p in DEFAULT_CANDIDATE_PATHS {
        if !paths.iter().any(|existing| existing == p) {
            paths.push(p.to_string());
        }
    }
    paths
}

fn open_first_responding_port(
    settings: &SerialSettings,
    device_path: Option<String>,
    probe: &Option<WhoAmIProbe>,
) -> Result<Box<dyn serialport::SerialPort>, TransportError> {
    for path in candidate_paths(&device_path) {
        let opened = serialport::new(&path, *settings.baud_rate())
            .timeout(Duration::from_millis(100))
            .open();

        let mut port = match opened {
            Ok(p) => p,
            Err(err) => {
                let err = TransportError::from(err);
                tracing::trace!(path = %path, error = %err, "candidate port did not open");
                continue;
            }
        };

        match probe {
            None => {
                tracing::trace!(path = %path, "serial port opened, no identity probe configured");
                return Ok(port);
            }
            Some(probe) => {
                if run_probe(port.as_mut(), probe) {
                    tracing::trace!(path = %path, "serial port opened and identity probe passed");
                    return Ok(port);
                }
                tracing::trace!(path = %path, "candidate port failed identity probe");
            }
        }
    }
    Err(TransportError::NoPortFound)
}

fn run_probe(port: &mut dyn serialport::SerialPort, probe: &WhoAmIProbe) -> bool {
    let mut buf = [0u8; 256];
    for _ in 0..probe.attempts {
        if port.write_all(&probe.request).is_err() {
            continue;
        }
        thread::sleep(probe.attempt_wait);
        match port.read(&mut buf) {
            Ok(n) if n > 0 && buf[0] == probe.expected_message_id => return true,
            _ => continue,
        }
    }
    false
}

///
/// Blocks until a replacement port is found or `shutdown` is raised,
/// re-entering `open_first_responding_port` on a fixed retry interval —
/// mirrors `motor.py connect_serial_port`'s reconnect loop.
///
fn reconnect(
    settings: &SerialSettings,
    device_path: &Option<String>,
    probe: &Option<WhoAmIProbe>,
    shutdown: &Arc<AtomicBool>,
) -> Option<Box<dyn serialport::SerialPort>> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return None;
        }
        match open_first_responding_port(settings, device_path.clone(), probe) {
            Ok(port) => {
                tracing::trace!("transport reconnected");
                return Some(port);
            }
            Err(err) => {
                tracing::warn!(error = %err, "reconnect attempt failed, retrying");
                thread::sleep(RECONNECT_RETRY_INTERVAL);
            }
        }
    }
}

fn io_loop(
    mut port: Box<dyn serialport::SerialPort>,
    settings: SerialSettings,
    device_path: Option<String>,
    probe: Option<WhoAmIProbe>,
    outbound_rx: Receiver<Vec<u8>>,
    inbound_tx: SyncSender<Vec<u8>>,
    shutdown: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
) {
    let mut decoder = FrameDecoder::new(*settings.stx());
    let mut read_buf = [0u8; 256];
    let mut dropped_frames: u64 = 0;

    loop {
        // Drain whatever is queued before checking shutdown, so a final
        // triplet enqueued right before `stop()` still reaches the wire.
        let mut lost_link = false;
        while let Ok(frame) = outbound_rx.try_recv() {
            if let Err(err) = port.write_all(&frame) {
                let err = TransportError::from(err);
                tracing::error!(error = %err, "serial write failed, closing port");
                lost_link = true;
                break;
            }
            tracing::trace!(len = frame.len(), "frame written");
        }

        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        if !lost_link {
            match port.read(&mut read_buf) {
                Ok(0) => {}
                Ok(n) => {
                    for payload in decoder.feed_bytes(&read_buf[..n]) {
                        match inbound_tx.try_send(payload) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                dropped_frames += 1;
                                tracing::warn!(dropped_frames, "inbound queue full, dropping newest frame");
                            }
                            Err(TrySendError::Disconnected(_)) => return,
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::TimedOut => {}
                Err(err) => {
                    let err = TransportError::from(err);
                    tracing::error!(error = %err, "serial read failed, closing port");
                    lost_link = true;
                }
            }

            decoder.check_timeout(Instant::now(), Duration::from_secs(2));
        }

        if lost_link {
            connected.store(false, Ordering::SeqCst);
            drop(port);
            match reconnect(&settings, &device_path, &probe, &shutdown) {
                Some(new_port) => {
                    port = new_port;
                    decoder = FrameDecoder::new(*settings.stx());
                    connected.store(true, Ordering::SeqCst);
                }
                None => break,
            }
        }

        thread::sleep(IO_LOOP_SLEEP);
    }
}
