//! Bounded boot-log capture.
//!
//! A capture opens the port, starts one background reader and waits for the
//! first of: a watcher verdict, end of stream, a read error, or the timeout.
//! The reader tees every byte into the in-memory transcript and a log file.
//!
//! ```text
//!   reader thread                      caller
//!   -------------                      ------
//!   read(1024) --Data(chunk)--------->  transcript += chunk
//!      |  \                             watcher.observe(chunk) -> stop?
//!      |   +--> .serial_log_*.log       recv_timeout(deadline)
//!   Closed / Failed ----------------->  end of capture
//!   (checks stop flag between reads) <-- stop flag on exit
//! ```
//!
//! The timeout never forcibly cancels the reader. The caller raises the stop
//! flag and waits a short grace period; a reader still stuck in a read is
//! detached and exits on its next read timeout.

mod classify;
mod text;

pub use {
    classify::{
        BootClassifier, BootMarkers, BootVerdict, FlashOutcome, LineLimit, LinesReached,
        PRE_FLASH_LINES, SCAN_WINDOW, Watcher, validate_identity,
    },
    text::{drain_utf8_lossy, printable, transcript_text},
};

use {
    crate::{
        error::{Error, Result},
        port::{CAPTURE_BAUD, SerialConfig, SerialOpener, SerialStream},
    },
    log::{debug, info, trace, warn},
    std::{
        fs::{self, File},
        io::{ErrorKind, Read, Write},
        path::{Path, PathBuf},
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicU32, Ordering},
            mpsc::{self, RecvTimeoutError, Sender},
        },
        thread::{self, JoinHandle},
        time::{Duration, Instant, SystemTime, UNIX_EPOCH},
    },
};

/// Bound on the pre-flash capture.
pub const PRE_FLASH_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on the post-flash capture.
pub const POST_FLASH_TIMEOUT: Duration = Duration::from_secs(20);

const READ_CHUNK: usize = 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Capture parameters.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Serial baud rate.
    pub baud: u32,
    /// Overall bound on the capture.
    pub timeout: Duration,
    /// OS-level timeout of a single read.
    pub read_timeout: Duration,
    /// How long to wait for the reader to release the port after the end.
    pub grace: Duration,
    /// Directory for the log artifact, `None` disables it.
    pub log_dir: Option<PathBuf>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            baud: CAPTURE_BAUD,
            timeout: POST_FLASH_TIMEOUT,
            read_timeout: Duration::from_millis(250),
            grace: Duration::from_millis(500),
            log_dir: Some(std::env::temp_dir()),
        }
    }
}

impl CaptureOptions {
    /// Options with a different overall bound.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Options writing log artifacts into `dir`.
    #[must_use]
    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }
}

/// How a capture ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEnd<V> {
    /// The watcher returned a verdict.
    Matched(V),
    /// The overall bound elapsed first.
    TimedOut,
    /// The device stopped producing data (end of stream).
    Closed,
    /// A read failed.
    ReadFailed(String),
}

/// Everything read during one capture.
#[derive(Debug)]
pub struct CaptureSession<V> {
    /// Raw bytes in arrival order.
    pub transcript: Vec<u8>,
    /// How the capture ended.
    pub end: CaptureEnd<V>,
    /// Log artifact, until discarded.
    pub log_path: Option<PathBuf>,
    /// Time spent capturing.
    pub elapsed: Duration,
}

impl<V> CaptureSession<V> {
    /// Transcript as display text.
    pub fn text(&self) -> String {
        transcript_text(&self.transcript)
    }

    /// Whether the capture hit its time bound.
    pub fn timed_out(&self) -> bool {
        matches!(self.end, CaptureEnd::TimedOut)
    }

    /// Delete the log artifact. Safe to call more than once.
    pub fn discard_log(&mut self) {
        if let Some(path) = self
            .log_path
            .take()
        {
            remove_log(&path);
        }
    }
}

impl CaptureSession<BootVerdict> {
    /// Post-flash outcome. Anything without a verdict is `Unknown`.
    pub fn outcome(&self) -> FlashOutcome {
        match &self.end {
            CaptureEnd::Matched(verdict) => FlashOutcome::from(verdict),
            CaptureEnd::TimedOut | CaptureEnd::Closed | CaptureEnd::ReadFailed(_) => {
                FlashOutcome::Unknown
            },
        }
    }
}

enum ReaderEvent {
    Data(Vec<u8>),
    Closed,
    Failed(String),
}

/// Capture boot output from `port` until `watcher` decides or time runs out.
///
/// `on_text` receives decoded output as it arrives. Opening the port can
/// fail with [`Error::PortUnavailable`]; everything after that ends in a
/// [`CaptureSession`], except an interrupt request, which stops the reader,
/// deletes the log and returns [`Error::Interrupted`].
pub fn capture<W: Watcher>(
    opener: &dyn SerialOpener,
    port: &str,
    options: &CaptureOptions,
    watcher: &mut W,
    on_text: &mut dyn FnMut(&str),
) -> Result<CaptureSession<W::Verdict>> {
    let config = SerialConfig::new(port, options.baud).with_timeout(options.read_timeout);
    let stream = opener.open(&config)?;

    let (log_path, log_file) = match options
        .log_dir
        .as_deref()
    {
        Some(dir) => open_log(dir),
        None => (None, None),
    };

    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    let reader = {
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("dcflash-capture".into())
            .spawn(move || read_loop(stream, log_file, &stop, &tx))?
    };

    info!(
        "Capturing {port} at {} baud for up to {}s",
        options.baud,
        options
            .timeout
            .as_secs()
    );

    let started = Instant::now();
    let deadline = started + options.timeout;
    let mut transcript = Vec::new();
    let mut pending = Vec::new();

    let end = loop {
        if crate::is_interrupted_requested() {
            stop_reader(&stop, reader, options.grace);
            if let Some(path) = &log_path {
                remove_log(path);
            }
            return Err(Error::Interrupted);
        }

        let now = Instant::now();
        if now >= deadline {
            break CaptureEnd::TimedOut;
        }

        match rx.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
            Ok(ReaderEvent::Data(chunk)) => {
                transcript.extend_from_slice(&chunk);
                pending.extend_from_slice(&chunk);
                let text = drain_utf8_lossy(&mut pending);
                if !text.is_empty() {
                    on_text(&text);
                }
                if let Some(verdict) = watcher.observe(&chunk) {
                    break CaptureEnd::Matched(verdict);
                }
            },
            Ok(ReaderEvent::Closed) | Err(RecvTimeoutError::Disconnected) => {
                break CaptureEnd::Closed;
            },
            Ok(ReaderEvent::Failed(reason)) => break CaptureEnd::ReadFailed(reason),
            Err(RecvTimeoutError::Timeout) => {},
        }
    };

    stop_reader(&stop, reader, options.grace);

    let elapsed = started.elapsed();
    match &end {
        CaptureEnd::Matched(_) => debug!("Capture stopped by watcher after {elapsed:?}"),
        CaptureEnd::TimedOut => info!("Capture timed out after {elapsed:?}"),
        CaptureEnd::Closed => info!("Serial stream closed after {elapsed:?}"),
        CaptureEnd::ReadFailed(reason) => warn!("Serial read failed: {reason}"),
    }

    Ok(CaptureSession {
        transcript,
        end,
        log_path,
        elapsed,
    })
}

fn read_loop(
    mut stream: SerialStream,
    mut log_file: Option<File>,
    stop: &AtomicBool,
    tx: &Sender<ReaderEvent>,
) {
    let mut buf = [0u8; READ_CHUNK];

    while !stop.load(Ordering::Relaxed) {
        match stream.read(&mut buf) {
            Ok(0) => {
                let _ = tx.send(ReaderEvent::Closed);
                break;
            },
            Ok(n) => {
                trace!("Serial RX {n} bytes");
                if let Some(file) = log_file.as_mut() {
                    if let Err(e) = file.write_all(&buf[..n]) {
                        warn!("Capture log write failed, continuing without it: {e}");
                        log_file = None;
                    }
                }
                if tx
                    .send(ReaderEvent::Data(buf[..n].to_vec()))
                    .is_err()
                {
                    break;
                }
            },
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {},
            Err(e) => {
                let _ = tx.send(ReaderEvent::Failed(e.to_string()));
                break;
            },
        }
    }

    if let Some(mut file) = log_file {
        let _ = file.flush();
    }
}

/// Raise the stop flag and reap the reader. Returns `true` when the reader
/// exited normally within `grace`.
fn stop_reader(stop: &AtomicBool, reader: JoinHandle<()>, grace: Duration) -> bool {
    stop.store(true, Ordering::Relaxed);
    let deadline = Instant::now() + grace;
    while !reader.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    if !reader.is_finished() {
        debug!("Capture reader still blocked in a read, detaching it");
        return false;
    }
    match reader.join() {
        Ok(()) => true,
        Err(_) => {
            trace!("Capture reader panicked");
            false
        },
    }
}

static LOG_SEQ: AtomicU32 = AtomicU32::new(0);

fn open_log(dir: &Path) -> (Option<PathBuf>, Option<File>) {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let seq = LOG_SEQ.fetch_add(1, Ordering::Relaxed);
    let path = dir.join(format!(".serial_log_{stamp}_{seq}.log"));

    match File::create(&path) {
        Ok(file) => {
            debug!("Teeing serial output to {}", path.display());
            (Some(path), Some(file))
        },
        Err(e) => {
            warn!("Could not create capture log {}: {e}", path.display());
            (None, None)
        },
    }
}

fn remove_log(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {},
        Err(e) => warn!("Failed to remove {}: {e}", path.display()),
    }
}
