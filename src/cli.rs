use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "nuage")]
#[command(version)]
#[command(about = "Provision a development environment from a declarative resource graph", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to nuage.toml
    #[arg(short, long, global = true, env = "NUAGE_CONFIG")]
    pub config: Option<String>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create or update the stack to match the declaration
    Up(UpArgs),

    /// Show what `up` would do, without changing anything
    Preview {
        /// Show input changes for updated and replaced resources
        #[arg(long)]
        diff: bool,
    },

    /// Delete every resource recorded for the stack
    Destroy(DestroyArgs),

    /// Show the stack outputs from the last run
    Outputs,

    /// Show the dependency graph of the declaration
    Graph,

    /// Install packages onto the shared filesystem
    Install {
        /// Package manager to install with
        #[arg(value_enum)]
        manager: PackageManager,

        /// Filesystem id (see `nuage outputs`)
        filesystem_id: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct UpArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Provider operations to run in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Stop starting new operations after this many seconds (0 = no limit)
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Provider operations to run in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PackageManager {
    /// Homebrew, under lambda_packages/linuxbrew
    Brew,
    /// pip
    Pip,
}

impl PackageManager {
    /// Install script for this package manager
    pub fn script(self) -> &'static str {
        match self {
            Self::Brew => "install_brew.sh",
            Self::Pip => "install_pip.sh",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_up() {
        let cli = Cli::parse_from(["nuage", "-vv", "up", "--yes", "-j", "8", "--timeout", "60"]);
        assert_eq!(cli.verbose, 2);
        let Command::Up(args) = cli.command else {
            panic!("expected up");
        };
        assert!(args.yes);
        assert_eq!(args.jobs, Some(8));
        assert_eq!(args.timeout, Some(60));
    }

    #[test]
    fn test_parse_install() {
        let cli = Cli::parse_from(["nuage", "install", "pip", "fs-0123456789abcdef0", "--config", "x.toml"]);
        assert_eq!(cli.config.as_deref(), Some("x.toml"));
        let Command::Install { manager, filesystem_id } = cli.command else {
            panic!("expected install");
        };
        assert_eq!(manager, PackageManager::Pip);
        assert_eq!(manager.script(), "install_pip.sh");
        assert_eq!(filesystem_id, "fs-0123456789abcdef0");
    }
}
