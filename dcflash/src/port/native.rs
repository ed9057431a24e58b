//! Native serial port implementation using the `serialport` crate.
//!
//! This module provides the serial port implementation for native platforms
//! (Linux, macOS, Windows).

use {
    crate::{
        error::{Error, Result},
        port::{PortEnumerator, PortInfo, SerialConfig, SerialOpener, SerialStream},
    },
    log::trace,
    std::io::Read,
};

/// An open native serial port, read side only.
pub struct NativeSerial {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl NativeSerial {
    /// Open a serial port with the given configuration.
    ///
    /// On Unix the port is opened in exclusive mode, so a second capture
    /// cannot attach while the first one still holds it.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| Error::PortUnavailable {
                port: config
                    .port_name
                    .clone(),
                reason: e.to_string(),
            })?;

        trace!(
            "Opened {} at {} baud",
            config.port_name, config.baud_rate
        );

        Ok(Self {
            port,
            name: config
                .port_name
                .clone(),
        })
    }

    /// Get the port name/path.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Read for NativeSerial {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .read(buf)
    }
}

/// Opens native serial ports for capture sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeOpener;

impl SerialOpener for NativeOpener {
    fn open(&self, config: &SerialConfig) -> Result<SerialStream> {
        Ok(Box::new(NativeSerial::open(config)?))
    }
}

/// Native port enumerator.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let (vid, pid, manufacturer, product, serial_number) = match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => (
                        Some(info.vid),
                        Some(info.pid),
                        info.manufacturer
                            .clone(),
                        info.product
                            .clone(),
                        info.serial_number
                            .clone(),
                    ),
                    _ => (None, None, None, None, None),
                };

                PortInfo {
                    name: p.port_name,
                    vid,
                    pid,
                    manufacturer,
                    product,
                    serial_number,
                }
            })
            .collect())
    }
}
