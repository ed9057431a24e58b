//! Shell completion generation.

use {
    crate::{Cli, CliError},
    anyhow::Result,
    clap::CommandFactory,
    clap_complete::{Shell, generate},
    rust_i18n::t,
    std::{env, io, path::Path},
};

/// Write completions for `shell` (or the detected one) to stdout.
pub(crate) fn cmd_completions(shell: Option<Shell>) -> Result<()> {
    let shell = shell
        .or_else(detect_shell_type)
        .ok_or_else(|| CliError::Usage(t!("completions.no_shell").to_string()))?;

    let mut cmd = Cli::command();
    let name = cmd
        .get_name()
        .to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

/// Detect the user's current shell from environment.
fn detect_shell_type() -> Option<Shell> {
    if let Ok(shell_path) = env::var("SHELL") {
        return shell_from_path(&shell_path);
    }

    if cfg!(windows) && env::var("PSModulePath").is_ok() {
        return Some(Shell::PowerShell);
    }

    None
}

fn shell_from_path(shell_path: &str) -> Option<Shell> {
    let shell_name = Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    match shell_name {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_from_path() {
        assert_eq!(shell_from_path("/bin/bash"), Some(Shell::Bash));
        assert_eq!(shell_from_path("/usr/bin/zsh"), Some(Shell::Zsh));
        assert_eq!(shell_from_path("/opt/homebrew/bin/fish"), Some(Shell::Fish));
        assert_eq!(shell_from_path("pwsh"), Some(Shell::PowerShell));
        assert_eq!(shell_from_path("/bin/tcsh"), None);
        assert_eq!(shell_from_path(""), None);
    }

    #[test]
    fn test_completions_mention_subcommands() {
        let mut buf = Vec::new();
        let mut cmd = Cli::command();
        generate(Shell::Bash, &mut cmd, "dcflash", &mut buf);
        let script = String::from_utf8(buf).unwrap();
        assert!(script.contains("list-ports"));
        assert!(script.contains("update"));
    }
}
