//! Serial port selection and confirmation prompts.
//!
//! Interactive runs use dialoguer; non-interactive runs never prompt and
//! pick the first likely target instead.

use {
    crate::CliError,
    console::style,
    dcflash::DetectedPort,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::info,
    rust_i18n::t,
    std::io::{self, IsTerminal},
};

/// Fail with a usage error unless stdin and stderr are terminals.
pub fn ensure_interactive_terminal() -> anyhow::Result<()> {
    if io::stdin().is_terminal() && io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(t!("serial.interactive_requires_tty").to_string()).into())
    }
}

/// Non-interactive choice: the first likely target, if any.
pub fn first_target(ports: &[DetectedPort]) -> Option<String> {
    let port = ports
        .iter()
        .find(|p| p.is_likely_target())?;
    info!(
        "Auto-selected port: {} [{}]",
        port.name,
        port.device
            .name()
    );
    Some(
        port.name
            .clone(),
    )
}

/// Menu label for one port; likely targets in bold.
pub fn port_label(port: &DetectedPort) -> String {
    let name = if port.is_likely_target() {
        style(&port.name)
            .bold()
            .to_string()
    } else {
        port.name
            .clone()
    };

    let device_info = if port
        .device
        .is_known()
    {
        format!(
            " [{}]",
            style(
                port.device
                    .name()
            )
            .yellow()
        )
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let description = port
        .description
        .as_ref()
        .map(|d| format!(" - {}", style(d).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{description}")
}

/// Interactive port menu, likely targets first. `None` when dismissed.
pub fn select_port(ports: &[DetectedPort]) -> dcflash::Result<Option<String>> {
    let targets = ports
        .iter()
        .filter(|p| p.is_likely_target())
        .count();
    eprintln!(
        "{} {}",
        style("ℹ").blue(),
        t!("serial.detected_ports", count = ports.len(), targets = targets)
    );

    // Keep labels on one line in narrow terminals.
    let term_width = usize::from(
        console::Term::stderr()
            .size()
            .1,
    );
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("serial.select_prompt").to_string())
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    Ok(selection.and_then(|index| {
        ports
            .get(index)
            .map(|p| p.name.clone())
    }))
}

/// Yes/no question defaulting to "no". Dismissing the prompt answers "no".
pub fn confirm(prompt: &str) -> dcflash::Result<bool> {
    Ok(Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false))
}

fn map_prompt_error(err: DialoguerError) -> dcflash::Error {
    match err {
        DialoguerError::IO(io_err) if io_err.kind() == io::ErrorKind::Interrupted => {
            dcflash::Error::Interrupted
        },
        DialoguerError::IO(io_err) => dcflash::Error::Io(io_err),
    }
}
