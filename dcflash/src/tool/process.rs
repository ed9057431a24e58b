//! Subprocess runner with merged, line-split output.

use {
    super::{ToolExit, ToolRunner},
    crate::error::{Error, Result},
    log::trace,
    std::{
        io::{ErrorKind, Read},
        process::{Command, Stdio},
        sync::mpsc::{self, Sender},
        thread::{self, JoinHandle},
    },
};

/// Runs the tool as a child process.
///
/// Stdout and stderr are drained on two threads and merged into one line
/// stream. Lines are split on `\r` as well as `\n` so progress updates that
/// rewrite the same terminal line arrive one by one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ToolExit> {
        trace!("Executing: {program} {}", args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::ToolMissing {
                tool: program.to_string(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel();
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child
            .stdout
            .take()
        {
            let tx = tx.clone();
            pumps.push(thread::spawn(move || pump_lines(stdout, &tx)));
        }
        if let Some(stderr) = child
            .stderr
            .take()
        {
            let tx = tx.clone();
            pumps.push(thread::spawn(move || pump_lines(stderr, &tx)));
        }
        drop(tx);

        let mut output = String::new();
        for line in rx {
            on_line(&line);
            output.push_str(&line);
            output.push('\n');
        }

        for pump in pumps {
            join_pump(pump);
        }
        let status = child.wait()?;

        Ok(ToolExit {
            code: status.code(),
            output,
        })
    }
}

/// Wait for an output pump. Returns `false` if it panicked.
fn join_pump(pump: JoinHandle<()>) -> bool {
    match pump.join() {
        Ok(()) => true,
        Err(_) => {
            trace!("Output pump panicked");
            false
        },
    }
}

/// Forward non-empty lines from `reader` until end of stream.
fn pump_lines(mut reader: impl Read, tx: &Sender<String>) {
    let mut pending = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        };

        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !flush_line(&mut pending, tx) {
                    return;
                }
            } else {
                pending.push(byte);
            }
        }
    }

    flush_line(&mut pending, tx);
}

/// Send the pending line if it has content. Returns `false` once the
/// receiver is gone.
fn flush_line(pending: &mut Vec<u8>, tx: &Sender<String>) -> bool {
    if pending.is_empty() {
        return true;
    }
    let line = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    tx.send(line)
        .is_ok()
}
