//! Test doubles for driving the update flow without hardware.

#![allow(dead_code)]

use {
    dcflash::{
        Confirmation, DetectedPort, Error, FlashLayout, HostOs, ImageKind, Interaction, Platform,
        PortInfo, Result, SerialConfig, SerialOpener, StagedImages, State, Timing, ToolExit,
        ToolRef, ToolRunner, UpdateEvent, UpdateOptions, UpdateReport, Updater,
    },
    std::{
        cell::RefCell,
        collections::VecDeque,
        fs,
        io::{self, Read},
        path::Path,
        sync::Mutex,
        thread,
        time::Duration,
    },
    tempfile::TempDir,
};

pub const BANNER: &str = "ESP-ROM:esp32s3-20210327\r\nBuild:Mar 27 2021\r\nrst:0xc (RTC_SW_CPU_RST)\r\n";
pub const VALID_BOOT: &str = "I (312) app: Doppelganger D_Core 1.4.2\r\nI (320) wiegand: ready\r\n";
pub const STOCK_BOOT: &str = "ESP-ROM:esp32s3-20210327\r\nwaiting for download\r\n";
pub const READY: &str = "[I] WEBSERVER started on port 80\r\n";

pub struct FakePlatform {
    pub ports: Vec<PortInfo>,
}

impl FakePlatform {
    pub fn with_target() -> Self {
        Self {
            ports: vec![
                PortInfo::named("/dev/ttyS0"),
                PortInfo {
                    vid: Some(0x303A),
                    pid: Some(0x1001),
                    product: Some("USB JTAG/serial debug unit".into()),
                    ..PortInfo::named("/dev/ttyACM0")
                },
            ],
        }
    }
}

impl Platform for FakePlatform {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn os(&self) -> HostOs {
        HostOs::Linux
    }

    fn enumerate_ports(&self) -> Result<Vec<PortInfo>> {
        Ok(self
            .ports
            .clone())
    }

    fn resolve_tool(&self) -> String {
        "esptool".into()
    }

    fn check_access(&self, _port: &str) -> Result<()> {
        Ok(())
    }
}

/// Scripted esptool: answers `version`, fails `chip-id`, and exits with
/// queued codes for erase and write.
pub struct FakeTool {
    pub version: &'static str,
    pub erase_codes: RefCell<VecDeque<i32>>,
    pub write_codes: RefCell<VecDeque<i32>>,
    pub calls: RefCell<Vec<Vec<String>>>,
}

impl FakeTool {
    pub fn new() -> Self {
        Self {
            version: "esptool v4.8.1\n4.8.1",
            erase_codes: RefCell::default(),
            write_codes: RefCell::default(),
            calls: RefCell::default(),
        }
    }

    pub fn with_write_codes(self, codes: &[i32]) -> Self {
        *self
            .write_codes
            .borrow_mut() = codes
            .iter()
            .copied()
            .collect();
        self
    }

    pub fn count(&self, sub_command: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|args| args.iter().any(|a| a == sub_command))
            .count()
    }

    pub fn writes(&self) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter(|args| args.iter().any(|a| a == "write-flash"))
            .cloned()
            .collect()
    }
}

impl ToolRunner for FakeTool {
    fn run(&self, _program: &str, args: &[String], on_line: &mut dyn FnMut(&str)) -> Result<ToolExit> {
        self.calls
            .borrow_mut()
            .push(args.to_vec());

        let (code, output) = if args == ["version"] {
            (0, self.version.to_string())
        } else if args.iter().any(|a| a == "chip-id") {
            (2, "A fatal error occurred: Failed to connect to ESP32-S3".to_string())
        } else if args.iter().any(|a| a == "erase-flash") {
            let code = self
                .erase_codes
                .borrow_mut()
                .pop_front()
                .unwrap_or(0);
            (code, "Chip erase completed successfully".to_string())
        } else {
            let code = self
                .write_codes
                .borrow_mut()
                .pop_front()
                .unwrap_or(0);
            (code, "Writing at 0x00010000... (100 %)\nHash of data verified.".to_string())
        };

        for line in output.lines() {
            on_line(line);
        }
        Ok(ToolExit {
            code: Some(code),
            output,
        })
    }
}

/// One capture worth of serial output.
pub struct Script {
    chunks: VecDeque<Vec<u8>>,
    eof: bool,
}

impl Script {
    /// Chunks followed by end of stream.
    pub fn closing(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks
                .iter()
                .map(|c| c.as_bytes().to_vec())
                .collect(),
            eof: true,
        }
    }

    /// Chunks followed by silence.
    pub fn silent_after(chunks: &[&str]) -> Self {
        Self {
            eof: false,
            ..Self::closing(chunks)
        }
    }
}

impl Read for Script {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        thread::sleep(Duration::from_millis(2));
        match self
            .chunks
            .pop_front()
        {
            Some(chunk) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            },
            None if self.eof => Ok(0),
            None => Err(io::ErrorKind::TimedOut.into()),
        }
    }
}

/// Hands out one script per open; opens beyond the scripts fail.
pub struct FakeSerial {
    scripts: Mutex<VecDeque<Script>>,
    pub opens: Mutex<usize>,
}

impl FakeSerial {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            opens: Mutex::new(0),
        }
    }

    pub fn opens(&self) -> usize {
        *self
            .opens
            .lock()
            .unwrap()
    }
}

impl SerialOpener for FakeSerial {
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Read + Send>> {
        *self
            .opens
            .lock()
            .unwrap() += 1;
        match self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
        {
            Some(script) => Ok(Box::new(script)),
            None => Err(Error::PortUnavailable {
                port: config
                    .port_name
                    .clone(),
                reason: "Device or resource busy".into(),
            }),
        }
    }
}

/// Scripted answers; records what was asked and shown.
#[derive(Default)]
pub struct Operator {
    pub answers: VecDeque<bool>,
    pub asked: Vec<Confirmation>,
    pub states: Vec<State>,
    pub offered: Vec<String>,
    pub retries: usize,
}

impl Operator {
    pub fn answering(answers: &[bool]) -> Self {
        Self {
            answers: answers
                .iter()
                .copied()
                .collect(),
            ..Self::default()
        }
    }
}

impl Interaction for Operator {
    fn choose_port(&mut self, ports: &[DetectedPort]) -> Result<Option<String>> {
        self.offered = ports
            .iter()
            .map(|p| p.name.clone())
            .collect();
        Ok(ports
            .iter()
            .find(|p| p.is_likely_target())
            .map(|p| p.name.clone()))
    }

    fn confirm(&mut self, question: Confirmation) -> Result<bool> {
        self.asked
            .push(question);
        Ok(self
            .answers
            .pop_front()
            .unwrap_or(false))
    }

    fn notify(&mut self, event: UpdateEvent<'_>) {
        match event {
            UpdateEvent::State(state) => self
                .states
                .push(state),
            UpdateEvent::Flash(dcflash::FlashEvent::Retrying { .. }) => self.retries += 1,
            _ => {},
        }
    }
}

/// Source bundle, working directory and log directory for one run.
pub struct Workspace {
    pub source: TempDir,
    pub work: TempDir,
    pub logs: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let source = tempfile::tempdir().unwrap();
        for kind in ImageKind::ALL {
            fs::write(source.path().join(kind.file_name()), b"\xE9\x05\x02\x2F image").unwrap();
        }
        Self {
            source,
            work: tempfile::tempdir().unwrap(),
            logs: tempfile::tempdir().unwrap(),
        }
    }

    pub fn stage(&self) -> StagedImages {
        StagedImages::stage(self.source.path(), self.work.path()).unwrap()
    }

    pub fn options(&self) -> UpdateOptions {
        UpdateOptions {
            timing: Timing {
                pre_flash_settle: Duration::ZERO,
                post_flash_settle: Duration::ZERO,
                pre_flash_timeout: Duration::from_millis(400),
                post_flash_timeout: Duration::from_millis(400),
                pre_flash_lines: 34,
                reader_grace: Duration::from_millis(100),
            },
            log_dir: Some(
                self.logs
                    .path()
                    .to_path_buf(),
            ),
            ..UpdateOptions::default()
        }
    }

    pub fn staged_files_left(&self) -> usize {
        count_files(self.work.path())
    }

    pub fn logs_left(&self) -> usize {
        count_files(self.logs.path())
    }
}

fn count_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| entries.count())
        .unwrap_or(0)
}

/// Run the whole flow against fakes.
pub fn run(
    workspace: &Workspace,
    options: UpdateOptions,
    platform: &FakePlatform,
    tool: &FakeTool,
    serial: &FakeSerial,
    operator: &mut Operator,
) -> Result<UpdateReport> {
    let mut images = workspace.stage();
    let mut updater = Updater::new(
        platform,
        tool,
        serial,
        ToolRef::new("esptool", HostOs::Linux),
        options,
    );
    updater.run(&mut images, &FlashLayout::defaults(), operator)
}

