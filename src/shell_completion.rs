//! Shell completion generation for the panectl CLI.

use clap::CommandFactory;
use clap_complete::{Shell, generate};

use crate::cli::{Cli, CompletionShell};

fn shell_for(shell: CompletionShell) -> Shell {
    match shell {
        CompletionShell::Bash => Shell::Bash,
        CompletionShell::Zsh => Shell::Zsh,
        CompletionShell::Fish => Shell::Fish,
    }
}

/// Completion script for `shell`.
pub fn render(shell: CompletionShell) -> String {
    let mut cmd = Cli::command();
    let mut out = Vec::new();
    generate(shell_for(shell), &mut cmd, "panectl", &mut out);
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_all_supported_shell_variants() {
        assert_eq!(shell_for(CompletionShell::Bash), Shell::Bash);
        assert_eq!(shell_for(CompletionShell::Zsh), Shell::Zsh);
        assert_eq!(shell_for(CompletionShell::Fish), Shell::Fish);
    }

    #[test]
    fn scripts_mention_subcommands() {
        for shell in [CompletionShell::Bash, CompletionShell::Zsh, CompletionShell::Fish] {
            let script = render(shell);
            assert!(script.contains("panectl"), "{shell:?}");
            assert!(script.contains("watch-bead"), "{shell:?}");
        }
    }
}
