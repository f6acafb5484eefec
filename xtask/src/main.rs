// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Developer tasks for the Marionette workspace.
//! Run with: cargo xtask <command>

mod commands;
mod helpers;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xtask", version, about = "Marionette workspace tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write an `index.json` dependency manifest next to each scene.
    Manifest {
        /// App config listing the tasks whose scenes are indexed.
        #[arg(required_unless_present = "scan", conflicts_with = "scan")]
        config: Option<PathBuf>,
        /// Index every `scene.xml` below this directory instead.
        #[arg(long, value_name = "DIR")]
        scan: Option<PathBuf>,
        /// JSON indent width.
        #[arg(long, default_value_t = 2)]
        indent: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Manifest {
            config,
            scan,
            indent,
        } => match (config, scan) {
            (_, Some(dir)) => commands::manifest::scan(&dir, indent).await,
            (Some(config), None) => commands::manifest::from_config(&config, indent).await,
            (None, None) => Err(anyhow::anyhow!("either a config file or --scan is required")),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            helpers::print_error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}
