// File: cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ScanConfig;
use crate::errors::ScanResult;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(long = "log-level", default_value = "warn", global = true)]
    pub log_level: String,

    #[arg(
        short = 'v',
        long = "verbose",
        help = "Print measured baselines and every dispatched test",
        global = true
    )]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long = "quiet",
        help = "Hide the progress bar and the scan summary",
        global = true
    )]
    pub quiet: bool,

    #[arg(
        long = "debug",
        help = "Log timing and raw bytes of every request",
        global = true
    )]
    pub debug: bool,

    #[arg(
        short = 'm',
        long = "methods",
        value_delimiter = ',',
        default_value = "GET,POST,PUT,DELETE",
        global = true
    )]
    pub methods: Vec<String>,

    #[arg(
        short = 'H',
        long = "header",
        help = "Extra request header, may be repeated",
        global = true
    )]
    pub headers: Vec<String>,

    #[arg(
        short = 'e',
        long = "enable",
        value_delimiter = ',',
        help = "Globs of mutations to enable",
        global = true
    )]
    pub enable: Vec<String>,

    #[arg(
        short = 'd',
        long = "disable",
        value_delimiter = ',',
        help = "Globs of mutations to disable",
        global = true
    )]
    pub disable: Vec<String>,

    #[command(flatten)]
    pub scan: ScanArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    #[arg(short = 'c', long = "workers", default_value_t = 10, global = true)]
    pub workers: usize,

    #[arg(
        long = "delay",
        default_value_t = 5000,
        help = "Milliseconds on top of the baseline that mark a hanging request",
        global = true
    )]
    pub delay: u64,

    #[arg(
        short = 'x',
        long = "stop-after",
        default_value_t = 0,
        help = "Stop testing a host after this many findings (0 = never)",
        global = true
    )]
    pub stop_after: u32,

    #[arg(
        long = "max-errors",
        default_value_t = 0,
        help = "Stop testing a host after this many errors (0 = never)",
        global = true
    )]
    pub max_errors: u32,

    #[arg(
        long = "checkpoint-interval",
        default_value_t = 30,
        help = "Seconds between state file checkpoints",
        global = true
    )]
    pub checkpoint_interval: u64,

    #[arg(
        short = 's',
        long = "state",
        default_value = "smuggles.state",
        global = true
    )]
    pub state: PathBuf,

    #[arg(short = 'o', long = "output", global = true)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan the targets read from stdin (default)
    Scan,
    /// List the enabled mutation names
    List,
    /// Print the probe request of a single test
    Poc(PocArgs),
    /// Fill a replay script template for a single test
    Script(ScriptArgs),
}

#[derive(Args, Debug)]
pub struct PocArgs {
    pub method: String,
    pub url: String,
    #[arg(help = "CL.TE or TE.CL")]
    pub desync_type: String,
    pub mutation: String,
}

#[derive(Args, Debug)]
pub struct ScriptArgs {
    pub template: PathBuf,
    pub method: String,
    pub url: String,
    pub mutation: String,
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        if self.verbose || self.debug {
            return LevelFilter::Debug;
        }
        match self.log_level.to_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Warn,
        }
    }

    /// Maps the flags onto a validated configuration.
    pub fn to_config(&self) -> ScanResult<ScanConfig> {
        let mut config = ScanConfig::new();

        config.set_workers(self.scan.workers);
        config.set_methods(
            self.methods
                .iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
        );
        for header in &self.headers {
            config.add_header(header.clone());
        }
        config.set_delay(Duration::from_millis(self.scan.delay));
        config.set_stop_after(self.scan.stop_after);
        config.set_max_errors(self.scan.max_errors);
        config.set_checkpoint_interval(Duration::from_secs(self.scan.checkpoint_interval));
        config.set_mutation_filters(self.enable.clone(), self.disable.clone())?;
        config.set_state_file(self.scan.state.clone());
        config.set_output_file(self.scan.output.clone());
        config.set_debug(self.debug);
        config.set_verbose(self.verbose);
        config.set_quiet(self.quiet);

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ScanError;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(args)
    }

    #[test]
    fn test_defaults_match_config_defaults() {
        let cli = parse(&["rsmuggle"]).unwrap();
        assert!(cli.command.is_none());

        let config = cli.to_config().unwrap();
        let defaults = ScanConfig::new();
        assert_eq!(config.workers(), defaults.workers());
        assert_eq!(config.methods(), defaults.methods());
        assert_eq!(config.delay(), defaults.delay());
        assert_eq!(config.checkpoint_interval(), defaults.checkpoint_interval());
        assert_eq!(config.state_file(), defaults.state_file());
        assert_eq!(config.mutations().len(), defaults.mutations().len());
        assert_eq!(cli.log_level(), LevelFilter::Warn);
    }

    #[test]
    fn test_scan_flags() {
        let cli = parse(&[
            "rsmuggle", "-c", "3", "-m", "GET,POST", "-H", "X-Test: 1", "--delay", "1500", "-x",
            "2", "--max-errors", "4", "-s", "run.state", "-o", "found.txt", "-e", "line*",
            "-d", "*tab*", "-v",
        ])
        .unwrap();
        let config = cli.to_config().unwrap();

        assert_eq!(config.workers(), 3);
        assert_eq!(config.methods(), ["GET", "POST"]);
        assert_eq!(config.headers().last().unwrap(), "X-Test: 1");
        assert_eq!(config.delay(), Duration::from_millis(1500));
        assert_eq!(config.stop_after(), 2);
        assert_eq!(config.max_errors(), 4);
        assert_eq!(config.state_file(), std::path::Path::new("run.state"));
        assert!(config.output_file().is_some());
        assert!(config.mutation("lineprefix-space").is_some());
        assert!(config.mutation("lineprefix-tab").is_none());
        assert!(config.verbose());
        assert_eq!(cli.log_level(), LevelFilter::Debug);
    }

    #[test]
    fn test_subcommands() {
        let cli = parse(&[
            "rsmuggle",
            "poc",
            "POST",
            "http://example.test/",
            "CL.TE",
            "standard",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Poc(args)) => {
                assert_eq!(args.method, "POST");
                assert_eq!(args.desync_type, "CL.TE");
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = parse(&["rsmuggle", "list", "-e", "dup-*"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::List)));
        assert_eq!(cli.enable, ["dup-*"]);
    }

    #[test]
    fn test_invalid_flags_are_config_errors() {
        let cli = parse(&["rsmuggle", "-c", "0"]).unwrap();
        assert!(matches!(cli.to_config(), Err(ScanError::Config(_))));

        assert!(parse(&["rsmuggle", "--workers", "many"]).is_err());
    }
}
