// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the main CLI structure and subcommands for thunkflow

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::ExecutionMode;

#[derive(Parser)]
#[command(name = "thunkflow")]
#[command(about = "A thunk-based workflow scheduler for declarative YAML workflow requests")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow request from a YAML file
    Run {
        #[arg(help = "Path to workflow request YAML file")]
        request: PathBuf,

        #[arg(
            short,
            long,
            help = "Override the execution mode (sequential, parallel, batch)",
            value_parser = parse_mode
        )]
        mode: Option<ExecutionMode>,

        #[arg(long, help = "Override the maximum number of steps per wave")]
        max_parallel: Option<usize>,

        #[arg(short, long, help = "Write the JSON result to this file")]
        output: Option<PathBuf>,
    },

    /// Validate a workflow request without executing it
    Validate {
        #[arg(help = "Path to workflow request YAML file")]
        request: PathBuf,
    },
}

fn parse_mode(value: &str) -> Result<ExecutionMode, String> {
    value.parse().map_err(|e: crate::engine::ExecutionError| e.to_string())
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_overrides() {
        let args = Args::try_parse_from([
            "thunkflow",
            "run",
            "request.yaml",
            "--mode",
            "batch",
            "--max-parallel",
            "3",
        ])
        .unwrap();

        match args.command {
            Commands::Run {
                request,
                mode,
                max_parallel,
                output,
            } => {
                assert_eq!(request, PathBuf::from("request.yaml"));
                assert_eq!(mode, Some(ExecutionMode::Batch));
                assert_eq!(max_parallel, Some(3));
                assert!(output.is_none());
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let result = Args::try_parse_from(["thunkflow", "run", "r.yaml", "--mode", "turbo"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags() {
        let args =
            Args::try_parse_from(["thunkflow", "validate", "r.yaml", "--verbose", "--no-color"])
                .unwrap();
        assert!(args.verbose);
        assert!(args.no_color);
    }
}
