//! Forma CLI - live previews for parametric CAD scripts

mod workspace;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use forma_engine::{
    AssetResolver, AssetRole, BridgeStatus, DirectoryResolver, DocumentWatcher, EditorEvent,
    HostController, LocalSurfaceFactory, MANIFEST_FILE, ManifestResolver, PreviewConfig,
    RenderState, config_path, load_config, save_config, spawn_worker, write_manifest,
};
use forma_kernel::{DirectoryModelStore, MemoryModelStore, ModelStore, RhaiKernel};
use forma_protocol::{ScriptSubmission, WorkerReply, WorkerRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::prelude::*;
use workspace::FsWorkspace;

#[derive(Parser)]
#[command(name = "forma")]
#[command(about = "Live previews for parametric CAD scripts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the stored preview configuration
#[derive(Args)]
struct Overrides {
    /// Directory holding the runtime assets
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Abort evaluations after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Abort scripts after this many operations
    #[arg(long)]
    max_operations: Option<u64>,
}

impl Overrides {
    fn apply(self, config: &mut PreviewConfig) {
        if let Some(assets) = self.assets {
            config.assets_dir = Some(assets);
        }
        if let Some(timeout) = self.timeout_ms {
            config.evaluation_timeout_ms = Some(timeout);
        }
        if let Some(max) = self.max_operations {
            config.kernel.max_operations = Some(max);
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a script, or a directory of scripts, and re-evaluate on save
    Watch {
        /// Script file or directory to watch
        path: PathBuf,

        #[command(flatten)]
        overrides: Overrides,

        /// Debounce window for saves in milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Where published models are written
        #[arg(long)]
        models: Option<PathBuf>,

        /// Also write the preview bootstrap page to this file
        #[arg(long)]
        html: Option<PathBuf>,
    },

    /// Evaluate a script once and print the resulting model
    Eval {
        /// Script file to evaluate
        script: PathBuf,

        #[command(flatten)]
        overrides: Overrides,

        /// Write the model JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate assets-manifest.json for an asset directory
    Manifest {
        /// Asset directory to scan
        dir: PathBuf,
    },

    /// Show the configuration, optionally writing the defaults
    Config {
        /// Write the current configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

fn init_tracing() {
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = load_config();

    match cli.command {
        Commands::Watch {
            path,
            overrides,
            debounce_ms,
            models,
            html,
        } => {
            overrides.apply(&mut config);
            if let Some(debounce) = debounce_ms {
                config.debounce_ms = debounce;
            }
            if let Some(models) = models {
                config.model_dir = Some(models);
            }
            run_watch(&path, &config, html.as_deref()).await
        }
        Commands::Eval {
            script,
            overrides,
            output,
        } => {
            overrides.apply(&mut config);
            run_eval(&script, &config, output.as_deref()).await
        }
        Commands::Manifest { dir } => {
            let path = write_manifest(&dir)
                .with_context(|| format!("Failed to generate manifest for {}", dir.display()))?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Commands::Config { init } => run_config(&config, init),
    }
}

/// Prefer a generated manifest, fall back to scanning the directory
fn resolver_for(dir: &Path) -> Box<dyn AssetResolver> {
    if dir.join(MANIFEST_FILE).is_file() {
        Box::new(ManifestResolver::in_dir(dir))
    } else {
        Box::new(DirectoryResolver::new(dir))
    }
}

async fn run_watch(path: &Path, config: &PreviewConfig, html: Option<&Path>) -> Result<()> {
    let store = DirectoryModelStore::new(config.resolved_model_dir())
        .context("Failed to create model output directory")?;
    let kernels = RhaiKernel::factory(Arc::new(store), config.kernel.clone());
    let surfaces = Arc::new(
        LocalSurfaceFactory::new(kernels).with_evaluation_timeout(config.evaluation_timeout()),
    );

    let workspace = FsWorkspace::new(path)?;
    let assets = resolver_for(&config.resolved_assets_dir());
    let mut host =
        HostController::new(workspace, assets, surfaces).with_title(config.title.clone());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let mut watcher = DocumentWatcher::new(config.debounce(), events_tx.clone())?;
    watcher.watch(path)?;

    host.open_preview().context("Failed to open the preview")?;
    let Some(session) = host.session() else {
        bail!("Preview closed during startup");
    };
    if let Some(html) = html {
        std::fs::write(html, session.content().to_html())
            .with_context(|| format!("Failed to write {}", html.display()))?;
        info!("Wrote preview page to {}", html.display());
    }
    tokio::spawn(present(session.render()));
    tokio::spawn(report_status(session.status()));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = events_tx.send(EditorEvent::Shutdown);
        }
    });

    println!("Watching {} (press Ctrl+C to stop)", path.display());
    host.run(events_rx).await;
    Ok(())
}

/// Print render state changes as they arrive
async fn present(mut render: watch::Receiver<RenderState>) {
    let mut generation = 0;
    let mut printed = 0;
    let mut shown: Option<String> = None;

    while render.changed().await.is_ok() {
        let state = render.borrow_and_update().clone();

        if state.generation() != generation {
            generation = state.generation();
            printed = 0;
            shown = None;
            println!("\n--- Evaluation #{generation} ---");
        }

        for line in state.log_lines().iter().skip(printed) {
            println!("{line}");
        }
        printed = state.log_lines().len();

        if let Some(url) = state.current_asset_url()
            && shown.as_deref() != Some(url)
        {
            println!("OK - model at {url}");
            shown = Some(url.to_string());
        }
    }
}

async fn report_status(mut status: watch::Receiver<BridgeStatus>) {
    while status.changed().await.is_ok() {
        if let BridgeStatus::Failed(message) = &*status.borrow_and_update() {
            eprintln!("Preview unavailable: {message}");
        }
    }
}

async fn run_eval(script: &Path, config: &PreviewConfig, output: Option<&Path>) -> Result<()> {
    let assets = resolver_for(&config.resolved_assets_dir()).resolve(&[AssetRole::KernelBinary])?;
    let kernel_binary = assets.require(AssetRole::KernelBinary)?.to_string();

    let text = std::fs::read_to_string(script)
        .with_context(|| format!("Failed to read {}", script.display()))?;
    let submission = ScriptSubmission::from_document(&text, script);

    let store = Arc::new(MemoryModelStore::new());
    let kernels = RhaiKernel::factory(store.clone(), config.kernel.clone());
    let (worker, mut replies) = spawn_worker("eval", kernels)?;

    worker.send(&WorkerRequest::Init {
        kernel_binary_address: kernel_binary,
    });
    worker.send(&WorkerRequest::Evaluate {
        code: submission.code().to_string(),
    });

    let finished = async {
        while let Some(payload) = replies.recv().await {
            match WorkerReply::decode(&payload) {
                Ok(WorkerReply::Log { log }) => eprintln!("{log}"),
                Ok(WorkerReply::Result { asset_url }) => return Ok(asset_url),
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    };
    let asset_url = match config.evaluation_timeout() {
        Some(limit) => tokio::time::timeout(limit, finished)
            .await
            .with_context(|| format!("Evaluation timed out after {limit:?}"))?,
        None => finished.await,
    }
    .context("Worker sent a malformed reply")?;

    let Some(url) = asset_url else {
        bail!("Evaluation of {} failed", submission.display_name());
    };
    let model = store
        .fetch(&url)
        .context("Published model is no longer available")?;
    let json = serde_json::to_string_pretty(&model)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Saved to: {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_config(config: &PreviewConfig, init: bool) -> Result<()> {
    let path = config_path().context("Could not determine config directory")?;
    if init {
        save_config(config).context("Failed to write configuration")?;
        println!("Wrote {}", path.display());
    } else {
        println!("# {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_to_config() {
        let cli = Cli::try_parse_from([
            "forma",
            "eval",
            "gear.fcad",
            "--assets",
            "dist/assets",
            "--timeout-ms",
            "1500",
        ])
        .unwrap();

        let Commands::Eval { overrides, .. } = cli.command else {
            panic!("expected eval command");
        };
        let mut config = PreviewConfig::default();
        overrides.apply(&mut config);

        assert_eq!(config.resolved_assets_dir(), PathBuf::from("dist/assets"));
        assert_eq!(config.evaluation_timeout_ms, Some(1500));
        assert_eq!(config.kernel.max_operations, None);
    }

    #[test]
    fn test_resolver_prefers_manifest() {
        let dir = std::env::temp_dir().join(format!("forma_cli_manifest_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), r#"{ "kernel-binary": "kernel.rhai" }"#).unwrap();
        std::fs::write(dir.join("kernel.rhai"), "").unwrap();
        std::fs::write(dir.join("kernel-ignored.rhai"), "").unwrap();

        let assets = resolver_for(&dir).resolve(&[AssetRole::KernelBinary]).unwrap();
        assert!(assets.require(AssetRole::KernelBinary).unwrap().ends_with("/kernel.rhai"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
