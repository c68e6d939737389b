use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vpsctl")]
#[command(version)]
#[command(about = "Declarative, idempotent provisioning for Debian VPS hosts", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Host description (default: $VPSCTL_CONFIG, then /etc/vpsctl/host.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bring the host to the described state
    Apply(ApplyArgs),

    /// Preview what apply would change (read-only)
    Plan(PlanArgs),

    /// Check the host description and its dependency graph
    Validate,

    /// List secrets generated on earlier runs
    Secrets {
        /// Print secret values instead of redacting them
        #[arg(long)]
        show: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Apply / Plan
// ============================================================================

#[derive(Args)]
pub struct ApplyArgs {
    /// Only this kind or kind.name (e.g., "packages", "file./etc/motd"), plus its dependencies
    #[arg(short, long)]
    pub target: Option<String>,

    /// Stop at the first failed resource and skip the rest
    #[arg(long)]
    pub halt_on_failure: bool,

    /// Seconds before a single command is killed
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Don't ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Print shadowsocks passwords in the final summary
    #[arg(long)]
    pub show_secrets: bool,

    /// Concurrent probes while previewing
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Only this kind or kind.name, plus its dependencies
    #[arg(short, long)]
    pub target: Option<String>,

    /// Concurrent probes
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Also list resources that are already satisfied
    #[arg(short, long)]
    pub all: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_apply_flags() {
        let cli = Cli::parse_from([
            "vpsctl",
            "-vv",
            "apply",
            "--target",
            "firewall",
            "--halt-on-failure",
            "--timeout",
            "30",
            "--yes",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.target.as_deref(), Some("firewall"));
        assert!(args.halt_on_failure);
        assert_eq!(args.timeout, Some(30));
        assert!(args.yes);
        assert!(!args.show_secrets);
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::parse_from(["vpsctl", "validate", "--config", "/tmp/host.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/host.toml")));
    }
}
