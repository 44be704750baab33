use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use auton_runtime::config::TUNABLES_PATH;
use auton_runtime::runtime::{self, Strategy};

#[derive(Parser)]
#[command(name = "auton-runtime", about = "Scripted autonomous runtime for a wheeled robot")]
struct Cli {
    /// Path to the tunables JSON file
    #[arg(long, default_value = TUNABLES_PATH)]
    tunables: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scripted autonomous sequence
    Run {
        /// Script text, e.g. "Move 48, PCone 2, RCone 1, SArm 2, Move -48"
        #[arg(long, conflicts_with = "script_file")]
        script: Option<String>,

        /// Read the script from a file instead
        #[arg(long)]
        script_file: Option<PathBuf>,

        /// Execution strategy
        #[arg(long, value_enum, default_value_t = Strategy::Encoder)]
        strategy: Strategy,
    },
    /// Replay the fixed calibration sequence and record the results
    Calibrate,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run {
            script,
            script_file,
            strategy,
        } => {
            let script = match (script, script_file) {
                (Some(text), _) => text,
                (None, Some(path)) => match std::fs::read_to_string(&path) {
                    Ok(text) => text,
                    Err(e) => {
                        eprintln!("Cannot read script file {}: {}", path.display(), e);
                        std::process::exit(1);
                    }
                },
                // An empty script is valid: the run completes immediately
                (None, None) => String::new(),
            };
            runtime::run(strategy, &script, &cli.tunables).await
        }
        Command::Calibrate => runtime::run_calibration(&cli.tunables).await,
    };

    if let Err(e) = result {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
