//! TejX playground runner

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tejx_bridge::logger::{self, LogLevel};
use tejx_bridge::{BridgeConfig, ExecutionBridge, ExecutionResult};

/// Run TejX code through the playground execution module
#[derive(Parser, Debug)]
#[command(name = "tejx-play")]
#[command(version)]
#[command(about = "TejX playground runner", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Module address (http(s) URL, file:// URL or path); defaults to $TEJX_COMPILER_WASM_URL
    #[arg(short, long, value_name = "ADDR", global = true)]
    module: Option<String>,

    /// Print the result as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a TejX source file
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Run TejX code given on the command line
    Eval {
        /// Code to run
        #[arg(value_name = "CODE")]
        code: String,
    },

    /// Load the module and report whether it is usable
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    logger::init_with_level(if args.verbose { LogLevel::Debug } else { LogLevel::Warn });

    let config = match args.module {
        Some(url) => BridgeConfig::new(url),
        None => BridgeConfig::from_env(),
    };
    let bridge = ExecutionBridge::new(&config);
    bridge.initialize().await;

    let source = match args.command {
        Commands::Run { file } => std::fs::read_to_string(&file)
            .with_context(|| format!("Failed to read: {}", file.display()))?,
        Commands::Eval { code } => code,
        Commands::Status => {
            println!("{}: {}", bridge.host().address(), bridge.state());
            return Ok(());
        }
    };

    let result = bridge.execute(&source).await;
    print_result(&result, args.json);

    if !result.succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn print_result(result: &ExecutionResult, json: bool) {
    if json {
        println!("{}", result.to_json());
        return;
    }
    for line in &result.lines {
        println!("{line}");
    }
    if let Some(detail) = &result.failure_detail {
        eprintln!("error: {detail}");
    }
}
