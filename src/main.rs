// File: main.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::Result;
use clap::Parser;
use simple_logger::SimpleLogger;

use rsmuggle::cli::{Cli, Commands};
use rsmuggle::commands;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = SimpleLogger::new().with_level(cli.log_level()).init() {
        eprintln!("Failed to initialise logger: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.to_config()?;

    match &cli.command {
        None | Some(Commands::Scan) => commands::handle_scan_command(config).await,
        Some(Commands::List) => commands::handle_list_command(&config),
        Some(Commands::Poc(args)) => commands::handle_poc_command(args, &config),
        Some(Commands::Script(args)) => commands::handle_script_command(args, &config).await,
    }
}
