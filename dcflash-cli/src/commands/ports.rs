//! Serial port listing.

use {
    crate::serial::port_label,
    anyhow::Result,
    console::style,
    dcflash::{Error, host, list_candidate_ports},
    rust_i18n::t,
};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let platform = host::current();
    let ports = match list_candidate_ports(platform.as_ref()) {
        Ok(ports) => ports,
        Err(Error::NoPortsFound) => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!(
        "{}",
        style(t!("list_ports.header"))
            .bold()
            .underlined()
    );
    if ports.is_empty() {
        eprintln!("  {}", style(t!("list_ports.no_ports")).dim());
        return Ok(());
    }

    for port in &ports {
        let bullet = if port.is_likely_target() {
            style("*").green()
        } else {
            style("•").dim()
        };
        eprintln!("  {bullet} {}", port_label(port));
    }

    if let Some(target) = ports
        .iter()
        .find(|p| p.is_likely_target())
    {
        eprintln!(
            "\n{} {}",
            style("→")
                .green()
                .bold(),
            t!(
                "list_ports.likely_target",
                port = style(&target.name)
                    .cyan()
                    .bold()
                    .to_string()
            )
        );
    }
    Ok(())
}
