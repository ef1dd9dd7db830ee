use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tracemend::logging::{self, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "tracemend")]
#[command(version, about = "Block-level tracing and self-repairing test runs for Python sources")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format on stderr
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the control-flow graphs of the given sources as JSON
    Cfg {
        /// Files or directories (walked for .py files)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print the basic blocks derived from the given sources as JSON
    Blocks {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Execute test code against the sources once, under the tracer
    Trace {
        /// Python file holding the test code
        #[arg(long)]
        tests: PathBuf,

        /// JSON file with blocks to trace (derived from the sources if omitted)
        #[arg(long)]
        blocks: Option<PathBuf>,

        /// Maximum trace entries to record
        #[arg(long)]
        max_steps: Option<usize>,

        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Generate a test, repair the sources until it runs, and assess each block
    Repair {
        /// What the code is supposed to do
        #[arg(long)]
        task: String,

        /// JSON file with blocks to trace (derived per attempt if omitted)
        #[arg(long)]
        blocks: Option<PathBuf>,

        /// Overrides repair.max_attempts
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Write the payload here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Sandbox child: reads a runner request on stdin, writes the response to stdout
    #[command(name = "sandbox-runner", hide = true)]
    SandboxRunner,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default .tracemend/config.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format)?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Cfg { paths } => cmd::cmd_cfg(&project_dir, paths).await?,
        Commands::Blocks { paths } => cmd::cmd_blocks(&project_dir, paths).await?,
        Commands::Trace {
            tests,
            blocks,
            max_steps,
            paths,
        } => {
            cmd::cmd_trace(&project_dir, tests, blocks.as_deref(), *max_steps, paths).await?;
        }
        Commands::Repair {
            task,
            blocks,
            max_attempts,
            output,
            paths,
        } => {
            cmd::cmd_repair(
                &project_dir,
                task,
                blocks.as_deref(),
                *max_attempts,
                output.as_deref(),
                paths,
            )
            .await?;
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::SandboxRunner => cmd::cmd_sandbox_runner()?,
    }

    Ok(())
}
