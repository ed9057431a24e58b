//! Command implementations.
//!
//! Each subcommand lives in its own module; the helpers here resolve the
//! settings they share.

pub(crate) mod check;
pub(crate) mod completions;
pub(crate) mod ports;
pub(crate) mod update;

use {
    crate::{Cli, config::Config, ui::UiOptions},
    dcflash::{Platform, ToolRef},
    log::debug,
};

/// Port from `--port`/`DCFLASH_PORT`, else from the config file.
pub(crate) fn configured_port(cli: &Cli, config: &Config) -> Option<String> {
    cli.port
        .clone()
        .or_else(|| {
            config
                .port
                .serial
                .clone()
        })
}

/// Tool from `--tool`/`DCFLASH_TOOL`, else the config file, else the
/// platform search.
pub(crate) fn resolve_tool(cli: &Cli, config: &Config, platform: &dyn Platform) -> ToolRef {
    let program = match cli
        .tool
        .clone()
        .or_else(|| {
            config
                .tool
                .path
                .clone()
        }) {
        Some(explicit) => explicit,
        None => platform.resolve_tool(),
    };
    let tool = ToolRef::new(program, platform.os());
    debug!(
        "Using {} ({:?} dialect) on {}",
        tool.program(),
        tool.dialect(),
        platform.name()
    );
    tool
}

pub(crate) fn ui_options(cli: &Cli, assume_yes: bool) -> UiOptions {
    UiOptions {
        quiet: cli.quiet,
        verbose: cli.verbose > 0,
        non_interactive: cli.non_interactive,
        assume_yes,
    }
}
