//! Stand-alone identity check and boot verification.
//!
//! Both reset the device and listen to one boot log without flashing.

use {
    super::{configured_port, resolve_tool, ui_options},
    crate::{Cli, CliError, config::Config, serial, ui::ConsoleInteraction},
    anyhow::Result,
    console::style,
    dcflash::{
        CapturePhase, FlashOutcome, NativeOpener, ProcessRunner, UpdateOptions, Updater, host,
    },
    rust_i18n::t,
};

/// Which single capture to run.
#[derive(Clone, Copy)]
enum Probe {
    Identity,
    Boot,
}

/// Check command implementation.
pub(crate) fn cmd_check(cli: &Cli, config: &Config) -> Result<()> {
    probe(cli, config, Probe::Identity)
}

/// Verify command implementation.
pub(crate) fn cmd_verify(cli: &Cli, config: &Config) -> Result<()> {
    probe(cli, config, Probe::Boot)
}

fn probe(cli: &Cli, config: &Config, what: Probe) -> Result<()> {
    if !cli.non_interactive {
        serial::ensure_interactive_terminal()?;
    }

    let platform = host::current();
    let tool = resolve_tool(cli, config, platform.as_ref());
    let options = UpdateOptions {
        port: configured_port(cli, config),
        ..UpdateOptions::default()
    };
    let runner = ProcessRunner;
    let opener = NativeOpener;
    let mut updater = Updater::new(platform.as_ref(), &runner, &opener, tool, options);
    let mut ui = ConsoleInteraction::new(ui_options(cli, false));

    updater.prepare_tool(&mut ui)?;
    let Some(port) = updater.select_port(&mut ui)? else {
        if ui.found_no_target() {
            return Err(CliError::Usage(t!("serial.no_target").to_string()).into());
        }
        ui.status(&style("→").dim().to_string(), &t!("summary.cancelled"));
        return Ok(());
    };

    let message = match what {
        Probe::Identity => {
            if updater.pre_flash(&port, &mut ui)? {
                t!("check.validated", port = port)
            } else {
                t!("check.unvalidated", port = port)
            }
        },
        Probe::Boot => match updater.verify(&port, CapturePhase::PostFlash, &mut ui)? {
            FlashOutcome::Success => t!("summary.success"),
            FlashOutcome::BootLoop => t!("summary.boot_loop"),
            FlashOutcome::Unknown => t!("summary.unknown"),
        },
    };
    ui.status(
        &style("→")
            .green()
            .bold()
            .to_string(),
        &message,
    );
    Ok(())
}
