use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use launcher_engine::commands::{self, CommandOutcome, DownloadPayload, InstallPayload};
use launcher_engine::core::loaders::InstallerKind;
use launcher_engine::core::state::default_data_dir;
use launcher_engine::{init_logging, EngineContext, EngineResult, EngineSettings};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "Runs launcher download and installer tasks", long_about = None)]
struct Args {
    /// Engine data directory (settings, cache, installers)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download one file, trying each URL in order
    Download {
        #[arg(required = true)]
        urls: Vec<String>,

        #[arg(short, long)]
        dest: PathBuf,

        /// `sha1:<hex>`, `sha256:<hex>`, `md5:<hex>` or a bare SHA-1
        #[arg(short, long)]
        checksum: Option<String>,

        #[arg(short, long)]
        size: Option<u64>,
    },
    /// Install a mod loader version into a game directory
    Install {
        loader: InstallerKind,
        minecraft_version: String,
        loader_version: String,

        #[arg(short, long)]
        game_dir: PathBuf,

        #[arg(long)]
        version_id: Option<String>,

        #[arg(long)]
        checksum: Option<String>,

        /// Also try the BMCLAPI mirror
        #[arg(long)]
        mirror: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    let data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);
    let mirror = matches!(args.command, Command::Install { mirror: true, .. });
    let ctx = match start_engine(&data_dir, mirror) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Failed to start engine: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        Command::Download {
            urls,
            dest,
            checksum,
            size,
        } => {
            commands::download(
                &ctx,
                DownloadPayload {
                    urls,
                    dest,
                    checksum,
                    size,
                },
            )
            .await
        }
        Command::Install {
            loader,
            minecraft_version,
            loader_version,
            game_dir,
            version_id,
            checksum,
            mirror: _,
        } => {
            commands::install(
                &ctx,
                InstallPayload {
                    loader,
                    minecraft_version,
                    loader_version,
                    game_dir,
                    version_id,
                    checksum,
                },
            )
            .await
        }
    };

    ctx.shutdown().await;

    match result {
        Ok(outcome) => {
            report(&outcome);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn start_engine(data_dir: &Path, mirror: bool) -> EngineResult<EngineContext> {
    let mut settings = EngineSettings::load(data_dir)?;
    settings.use_mirror |= mirror;
    EngineContext::new(settings)
}

fn report(outcome: &CommandOutcome) {
    for warning in &outcome.warnings {
        warn!("{}", warning);
    }
    info!("{} finished", outcome.tag);
    println!("{}", outcome.path.display());
}
