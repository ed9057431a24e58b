//! The guided update.

use {
    super::{configured_port, resolve_tool, ui_options},
    crate::{Cli, CliError, UpdateArgs, config::Config, serial, ui::ConsoleInteraction},
    anyhow::{Context, Result},
    console::style,
    dcflash::{
        CancelReason, DeviceProfile, FlashLayout, FlashOutcome, FlashParams, NativeOpener,
        ProcessRunner, Recovery, StagedImages, UpdateOptions, UpdateReport, UpdateStatus, Updater,
        host,
    },
    log::debug,
    rust_i18n::t,
    std::path::PathBuf,
    tempfile::TempDir,
};

/// Build metadata file looked for next to the images.
const METADATA_FILE: &str = "idedata.json";

/// Update command implementation.
pub(crate) fn cmd_update(cli: &Cli, config: &Config, args: &UpdateArgs) -> Result<()> {
    if !cli.non_interactive {
        serial::ensure_interactive_terminal()?;
    }

    let firmware_dir = args
        .firmware_dir
        .clone()
        .or_else(|| {
            config
                .firmware
                .dir
                .clone()
        })
        .unwrap_or_else(|| PathBuf::from("."));
    let metadata = args
        .metadata
        .clone()
        .or_else(|| {
            config
                .firmware
                .metadata
                .clone()
        })
        .unwrap_or_else(|| firmware_dir.join(METADATA_FILE));
    // Outlives the staged images.
    let (work_dir, _temporary): (PathBuf, Option<TempDir>) = match args
        .work_dir
        .clone()
        .or_else(|| {
            config
                .firmware
                .work_dir
                .clone()
        }) {
        Some(dir) => (dir, None),
        None => {
            let temporary = temporary_work_dir()?;
            (
                temporary
                    .path()
                    .to_path_buf(),
                Some(temporary),
            )
        },
    };

    let mut images = StagedImages::stage(&firmware_dir, &work_dir)
        .with_context(|| t!("error.stage", dir = firmware_dir.display()).to_string())?;
    let layout = FlashLayout::with_build_metadata(&metadata);
    let params = first_attempt_params(config, args);

    let mut ui = ConsoleInteraction::new(ui_options(cli, args.yes));
    let profile = DeviceProfile::detect(&images.application_bytes()?);
    ui.status(
        &style("📦").cyan().to_string(),
        &t!("update.firmware", profile = profile.display_name()),
    );
    debug!("Flash layout: {layout}, first attempt: {params}");

    let platform = host::current();
    let tool = resolve_tool(cli, config, platform.as_ref());
    let options = UpdateOptions {
        port: configured_port(cli, config),
        params,
        ..UpdateOptions::default()
    };

    let runner = ProcessRunner;
    let opener = NativeOpener;
    let mut updater = Updater::new(platform.as_ref(), &runner, &opener, tool, options);
    let report = updater.run(&mut images, &layout, &mut ui)?;
    if matches!(
        report.status,
        UpdateStatus::Cancelled {
            reason: CancelReason::NoPortChosen,
        }
    ) && ui.found_no_target()
    {
        return Err(CliError::Usage(t!("serial.no_target").to_string()).into());
    }

    summarize(&ui, &report);
    Ok(())
}

/// Parameters of the first write attempt: flags over config over the safe baseline.
fn first_attempt_params(config: &Config, args: &UpdateArgs) -> FlashParams {
    let base = config
        .flash
        .apply(FlashParams::SAFE);
    FlashParams {
        mode: args
            .flash_mode
            .unwrap_or(base.mode),
        frequency: args
            .flash_freq
            .unwrap_or(base.frequency),
        baud: args
            .flash_baud
            .unwrap_or(base.baud),
        use_stub: args.stub || base.use_stub,
    }
}

/// Fresh `dcflash-*` directory under the system temp dir, removed when dropped.
fn temporary_work_dir() -> Result<TempDir> {
    let dir = tempfile::Builder::new()
        .prefix("dcflash-")
        .tempdir()
        .context("Failed to create a temporary work directory")?;
    debug!("Staging into {}", dir.path().display());
    Ok(dir)
}

fn summarize(ui: &ConsoleInteraction, report: &UpdateReport) {
    let message = match report.status {
        UpdateStatus::Cancelled { .. } => t!("summary.cancelled"),
        UpdateStatus::Finished {
            recovery: Recovery::Declined,
            ..
        } => t!("summary.recovery_declined"),
        UpdateStatus::Finished { .. } => match report
            .status
            .outcome()
        {
            Some(FlashOutcome::Success) => t!("summary.success"),
            Some(FlashOutcome::BootLoop) => t!("summary.boot_loop"),
            _ => t!("summary.unknown"),
        },
    };
    ui.status(&style("→").green().bold().to_string(), &message);
}
