use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollout")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Agentless infrastructure automation", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Do not ask for confirmation before making changes
    #[arg(short, long, global = true)]
    pub yes: bool,

    #[command(flatten)]
    pub target: TargetArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Where to find hosts and how to reach them
#[derive(Args, Debug, Default)]
pub struct TargetArgs {
    /// Project file (defaults to ./rollout.toml, then the user config dir)
    #[arg(short, long, global = true, env = "ROLLOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Inventory file, overriding the project file
    #[arg(short, long, global = true, env = "ROLLOUT_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Extra host specs, e.g. `web1`, `@local`, `@docker/ubuntu:24.04`
    #[arg(short = 'H', long = "host", global = true, value_delimiter = ',')]
    pub hosts: Vec<String>,

    /// Only run against these hosts
    #[arg(short, long, global = true, value_delimiter = ',')]
    pub limit: Vec<String>,

    /// Number of hosts worked on at once (0 = all)
    #[arg(long, global = true)]
    pub parallel: Option<usize>,

    /// Abort once more than this percentage of hosts failed
    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub fail_percent: Option<u8>,

    /// Run commands through sudo
    #[arg(long, global = true)]
    pub sudo: bool,

    /// Run commands as this user through sudo
    #[arg(long, global = true)]
    pub sudo_user: Option<String>,

    /// Run commands as this user through su
    #[arg(long, global = true)]
    pub su_user: Option<String>,

    /// Run commands through doas
    #[arg(long, global = true)]
    pub doas: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show hosts, groups and their data
    Inventory {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Gather a fact from every host
    Fact {
        /// Fact name, e.g. `File` or `DockerContainers`
        #[arg(required_unless_present = "list")]
        name: Option<String>,

        /// Fact arguments
        args: Vec<String>,

        /// List the available facts
        #[arg(long)]
        list: bool,
    },

    /// Run a shell command on every host
    Exec {
        /// The command, passed to the remote shell as one string
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// Keep going on hosts where the command fails
        #[arg(long)]
        ignore_errors: bool,
    },

    /// Upload a local file to every host, skipping hosts that already have it
    Put {
        /// Local file
        src: PathBuf,

        /// Remote path
        dest: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
