use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::{Map, Value};

use crate::constants::DEFAULT_MIME_TYPE;

/// Command-line arguments for the restupload tool.
///
/// Each file is uploaded through the API endpoint given with `--api`; the
/// endpoint answers with an upload descriptor and the engine takes it from
/// there. Use `-` to upload standard input.
#[derive(Parser, Debug)]
#[clap(name = "restupload", about = "Upload files through a REST API endpoint")]
pub struct Args {
    /// API endpoint to direct the upload to (e.g. "Drive/Item:upload")
    #[clap(short, long)]
    pub api: String,

    /// Parameters passed to the API, as JSON or url-encoded pairs
    #[clap(short, long)]
    pub params: Option<String>,

    /// HTTP method of the initial API request
    #[clap(short, long, default_value = "POST")]
    pub method: String,

    /// Override the API hostname (e.g. api.example.com)
    #[clap(long)]
    pub hostname: Option<String>,

    /// Scheme used to reach the API
    #[clap(long)]
    pub scheme: Option<String>,

    /// Bearer token sent with API requests
    #[clap(long)]
    pub token: Option<String>,

    /// Path to configuration YAML file
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Number of parts uploaded at the same time
    #[clap(long)]
    pub parallel: Option<usize>,

    /// Content type of the uploaded data (default: guessed from the extension)
    #[clap(long)]
    pub mime: Option<String>,

    /// Suppress progress output
    #[clap(short, long)]
    pub quiet: bool,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,

    /// Files to upload, `-` for standard input
    #[clap(required = true)]
    pub files: Vec<String>,
}

impl Args {
    /// Parsed `--params`, empty when not given.
    pub fn base_params(&self) -> Result<Map<String, Value>> {
        match &self.params {
            Some(params) => parse_params(params),
            None => Ok(Map::new()),
        }
    }
}

/// Parse API parameters given as a JSON object or as `a=1&b=2`.
pub fn parse_params(input: &str) -> Result<Map<String, Value>> {
    let input = input.trim();
    if input.starts_with('{') {
        let value: Value = serde_json::from_str(input).context("Failed to parse JSON params")?;
        return match value {
            Value::Object(map) => Ok(map),
            _ => Err(anyhow!("JSON params must be an object")),
        };
    }

    let mut map = Map::new();
    for pair in input.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key.is_empty() {
            return Err(anyhow!("Invalid parameter: {}", pair));
        }
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(map)
}

/// Guess a content type from the file extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("txt") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("csv") => "text/csv",
        Some("xml") => "text/xml",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("tar") => "application/x-tar",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        _ => DEFAULT_MIME_TYPE,
    }
}

/// Human readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        b if b >= GB => format!("{:.2} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.2} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.2} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}

/// Progress line on stderr, redrawn at most every 100ms.
pub struct ProgressTracker {
    name: String,
    total: Option<u64>,
    state: Mutex<ProgressState>,
}

struct ProgressState {
    current: u64,
    last_print: Option<Instant>,
}

impl ProgressTracker {
    pub fn new(name: impl Into<String>, total: Option<u64>) -> Self {
        Self {
            name: name.into(),
            total,
            state: Mutex::new(ProgressState { current: 0, last_print: None }),
        }
    }

    pub fn update(&self, bytes: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.current += bytes;
            let due = state
                .last_print
                .map_or(true, |last| last.elapsed() >= Duration::from_millis(100));
            if due {
                self.display(state.current);
                state.last_print = Some(Instant::now());
            }
        }
    }

    pub fn finish(&self) {
        if let Ok(state) = self.state.lock() {
            self.display(state.current);
        }
        eprint!("\x1b[K\n");
    }

    pub fn current(&self) -> u64 {
        self.state.lock().map(|state| state.current).unwrap_or(0)
    }

    /// Text of the progress line for `current` bytes.
    pub fn render(&self, current: u64) -> String {
        let total = match self.total {
            Some(total) if total > 0 => total,
            _ => return format!("{}: {} uploaded", self.name, format_bytes(current)),
        };

        const BAR_WIDTH: usize = 30;
        let percent = current as f64 * 100.0 / total as f64;
        let filled = ((percent * BAR_WIDTH as f64 / 100.0) as usize).min(BAR_WIDTH);
        let bar: String = "█".repeat(filled) + &"░".repeat(BAR_WIDTH - filled);

        format!(
            "{}: [{}] {:.1}% ({}/{})",
            self.name,
            bar,
            percent,
            format_bytes(current),
            format_bytes(total)
        )
    }

    fn display(&self, current: u64) {
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "\r{}\x1b[K", self.render(current));
        let _ = stderr.flush();
    }
}
