// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

use clap::Parser;
use log::LevelFilter;
use std::process;

/// System daemon for managing power profiles over DBus
#[derive(Parser)]
#[command(name = "power-profiles-daemon", version, about)]
struct Args {
    /// Show extra debugging information
    #[arg(short, long)]
    verbose: bool,

    /// Replace the running instance of power-profiles-daemon
    #[arg(short, long)]
    replace: bool,
}

fn main() {
    let args = Args::parse();

    let filter = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    if let Err(why) = power_profiles_daemon::logging::setup(filter) {
        eprintln!("failed to set up logging: {}", why);
        process::exit(1);
    }

    match power_profiles_daemon::daemon::daemon(args.replace) {
        Ok(code) => process::exit(code),
        Err(why) => {
            log::error!("{:#}", why);
            process::exit(1);
        }
    }
}
