use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mockup_contracts::events::EventLog;
use mockup_contracts::{
    Background, EditRequest, GenerateRequest, ImageFile, ImageResult, ImageSize, OutputFormat,
};
use mockup_engine::media::sniff_image_mime;
use mockup_engine::{
    ClientConfig, CorsPolicy, ImageApiClient, LocalDirStore, MockupService, ServiceConfig,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod server;

#[derive(Debug, Parser)]
#[command(name = "mockup-rs", version, about = "Product mockup image backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP backend.
    Serve(ServeArgs),
    /// Generate one image from a prompt.
    Generate(GenerateArgs),
    /// Apply an overlay image onto a base image.
    Edit(EditArgs),
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, env = "MOCKUP_BIND", default_value = "127.0.0.1:8787")]
    bind: SocketAddr,
    #[arg(long)]
    asset_root: Option<PathBuf>,
    #[arg(long)]
    public_base_url: Option<String>,
    #[arg(long)]
    allowed_origins: Option<String>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ImageOptions {
    #[arg(long, default_value = "1024x1024")]
    size: ImageSize,
    #[arg(long, default_value = "auto")]
    background: Background,
    #[arg(long, default_value = "png")]
    format: OutputFormat,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[command(flatten)]
    image: ImageOptions,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    base: PathBuf,
    #[arg(long)]
    overlay: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[command(flatten)]
    image: ImageOptions,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("mockup-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => run_serve(args),
        Command::Generate(args) => run_generate(args),
        Command::Edit(args) => run_edit(args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_client(events: Option<&Path>) -> Result<ImageApiClient> {
    let client = ImageApiClient::new(ClientConfig::from_env());
    Ok(match events {
        Some(path) => client.with_events(EventLog::open(path, &Uuid::new_v4().to_string())?),
        None => client,
    })
}

fn run_serve(args: ServeArgs) -> Result<i32> {
    let mut config = ServiceConfig::from_env();
    if let Some(root) = args.asset_root {
        config.asset_root = root;
    }
    if let Some(base) = args.public_base_url {
        config.public_asset_base_url = Some(base);
    }
    if let Some(origins) = args.allowed_origins {
        config.allowed_origins = origins;
    }

    // The blocking HTTP client must be created and dropped outside the async runtime.
    let client = build_client(args.events.as_deref())?;
    if client.config().bearer_token().is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; image routes will fail until it is");
    }
    let store = Arc::new(LocalDirStore::new(&config.asset_root));
    let service = Arc::new(MockupService::new(client, store, &config));
    let state = server::AppState {
        service: Arc::clone(&service),
        cors: Arc::new(CorsPolicy::from_allowed_origins(&config.allowed_origins)),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let served = runtime.block_on(server::serve(args.bind, state));
    drop(runtime);
    drop(service);
    served?;
    Ok(0)
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let client = build_client(args.image.events.as_deref())?;
    let mut request = GenerateRequest::new(args.prompt)
        .size(args.image.size)
        .background(args.image.background)
        .output_format(args.image.format);
    if let Some(model) = args.image.model {
        request = request.model(model);
    }
    let result = client.generate(request)?;
    write_result(&args.out, &result)?;
    Ok(0)
}

fn run_edit(args: EditArgs) -> Result<i32> {
    let client = build_client(args.image.events.as_deref())?;
    let mut request = EditRequest::new(
        args.prompt,
        read_image_file(&args.base)?,
        read_image_file(&args.overlay)?,
    )
    .size(args.image.size)
    .background(args.image.background)
    .output_format(args.image.format);
    if let Some(model) = args.image.model {
        request = request.model(model);
    }
    let result = client.edit(request)?;
    write_result(&args.out, &result)?;
    Ok(0)
}

fn read_image_file(path: &Path) -> Result<ImageFile> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("image.png")
        .to_string();
    let content_type = sniff_image_mime(&bytes).to_string();
    Ok(ImageFile::new(bytes, file_name, content_type))
}

fn write_result(out: &Path, result: &ImageResult) -> Result<()> {
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    fs::write(out, &result.bytes).with_context(|| format!("failed to write {}", out.display()))?;
    println!(
        "{}",
        serde_json::to_string(&serde_json::json!({
            "out": out.display().to_string(),
            "bytes": result.bytes.len(),
            "content_type": result.content_type,
            "metadata": result.metadata,
        }))?
    );
    Ok(())
}
