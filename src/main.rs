use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use reqwest::Method;
use serde_json::{Map, Value};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::fs::File;
use tokio::io::Stdin;
use tokio::runtime::Runtime;

use restupload::api::RestClient;
use restupload::cli::{mime_for_path, Args, ProgressTracker};
use restupload::config::{load_config, AppConfig};
use restupload::transport::ReqwestTransport;
use restupload::upload::{UploadOptions, Uploader};

fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    initialize_logging(args.verbose)?;

    // Load and process configuration
    let config = load_and_process_config(&args)?;
    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .map_err(|_| anyhow!("Invalid HTTP method: {}", args.method))?;

    let runtime = Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(upload_all(&args, config, method))
}

/// Initialize logging with the specified verbosity level
fn initialize_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;
    Ok(())
}

/// Load configuration, then apply command line overrides
fn load_and_process_config(args: &Args) -> Result<AppConfig> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(hostname) = &args.hostname {
        config.api.host = hostname.clone();
    }
    if let Some(scheme) = &args.scheme {
        config.api.scheme = scheme.clone();
    }
    if let Some(token) = &args.token {
        config.api.token = Some(token.clone());
    }
    if let Some(parallel) = args.parallel {
        config.upload.parallel_uploads = parallel;
    }
    config.upload.validate()?;

    Ok(config)
}

async fn upload_all(args: &Args, config: AppConfig, method: Method) -> Result<()> {
    let api = RestClient::new(config.api.clone()).context("Failed to create API client")?;
    let transport = ReqwestTransport::new().context("Failed to create HTTP transport")?;
    let uploader = Uploader::new(Arc::new(api), Arc::new(transport), config.upload);
    let base_params = args.base_params()?;
    let show_progress = !args.quiet && std::io::stderr().is_terminal();

    for file in &args.files {
        if !show_progress {
            info!("Uploading file {}", file);
        }
        let data = upload_one(&uploader, args, &method, &base_params, file, show_progress)
            .await
            .with_context(|| format!("Failed to upload {}", file))?;
        println!("{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}

async fn upload_one(
    uploader: &Uploader,
    args: &Args,
    method: &Method,
    base_params: &Map<String, Value>,
    file: &str,
    show_progress: bool,
) -> Result<Value> {
    let mut params = base_params.clone();

    if file == "-" {
        let mime = args.mime.clone().unwrap_or_else(|| mime_for_path(Path::new(file)).to_string());
        params.insert("filename".to_string(), Value::from("stdin"));
        params.insert("type".to_string(), Value::from(mime.clone()));
        let payload = Payload::Stdin(tokio::io::stdin());
        return send(uploader, args, method, params, payload, "stdin", &mime, show_progress).await;
    }

    let path = Path::new(file);
    let source = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let metadata = source
        .metadata()
        .await
        .with_context(|| format!("Failed to stat {}", path.display()))?;

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string());
    let mime = args.mime.clone().unwrap_or_else(|| mime_for_path(path).to_string());

    params.insert("filename".to_string(), Value::from(name.clone()));
    params.insert("type".to_string(), Value::from(mime.clone()));
    params.insert("size".to_string(), Value::from(metadata.len()));
    if let Some(modified) = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
    {
        params.insert("lastModified".to_string(), Value::from(modified.as_secs()));
    }

    send(uploader, args, method, params, Payload::File(source, metadata.len()), &name, &mime, show_progress).await
}

/// What one command line argument uploads.
enum Payload {
    /// Standard input, length unknown
    Stdin(Stdin),
    /// A regular file and its size
    File(File, u64),
}

impl Payload {
    fn length(&self) -> Option<u64> {
        match self {
            Payload::Stdin(_) => None,
            Payload::File(_, size) => Some(*size),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn send(
    uploader: &Uploader,
    args: &Args,
    method: &Method,
    params: Map<String, Value>,
    payload: Payload,
    name: &str,
    mime: &str,
    show_progress: bool,
) -> Result<Value> {
    let mut options = UploadOptions::default();
    let tracker = show_progress.then(|| Arc::new(ProgressTracker::new(name, payload.length())));
    if let Some(tracker) = &tracker {
        let tracker = Arc::clone(tracker);
        options = options.with_progress(Arc::new(move |bytes| tracker.update(bytes)));
    }

    let params = Value::Object(params);
    let result = match payload {
        Payload::Stdin(stdin) => {
            uploader
                .upload(&args.api, method.clone(), params, stdin, mime, None, &options)
                .await
        }
        Payload::File(file, _) => {
            uploader
                .upload_seekable(&args.api, method.clone(), params, file, mime, &options)
                .await
        }
    };

    if let Some(tracker) = &tracker {
        tracker.finish();
    }

    Ok(result?.data)
}
