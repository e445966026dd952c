//! Tracing setup for the server binary.
//!
//! Log targets form a small tree rooted at `patchbay`: the engine side
//! logs under `patchbay::{engine,reader,flow,parser}` and the server
//! side under `patchbay::{startup,api,ws}`. A verbosity preset picks
//! levels for the whole tree and `--log target=level` flags override
//! individual subtrees; a `RUST_LOG` value in the environment replaces
//! the computed filter wholesale.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output encoding for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line text.
    #[default]
    Text,
    /// One JSON object per line, for aggregation.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("text") {
            Ok(LogFormat::Text)
        } else if s.eq_ignore_ascii_case("json") {
            Ok(LogFormat::Json)
        } else {
            Err(format!("unknown log format '{s}' (expected text or json)"))
        }
    }
}

/// Overall verbosity. Quiet beats everything; otherwise the noisiest
/// flag given wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Debug,
    Trace,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, debug: bool, trace: bool, quiet: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if trace {
            Verbosity::Trace
        } else if debug {
            Verbosity::Debug
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    /// Baseline directives for the target tree. The reader, flow gate,
    /// and parser fire per chunk and ws pings per client, so those
    /// targets stay damped until the debug levels; a busy session must
    /// not flood the log at default verbosity.
    fn directives(self) -> &'static [&'static str] {
        match self {
            Verbosity::Quiet => &["patchbay=warn", "tower_http=error"],
            Verbosity::Normal => &[
                "patchbay=info",
                "patchbay::reader=warn",
                "patchbay::flow=warn",
                "patchbay::parser=warn",
                "patchbay::ws::ping=off",
                "tower_http=warn",
            ],
            Verbosity::Verbose => &[
                "patchbay=info",
                "patchbay::ws::ping=off",
                "tower_http=info",
            ],
            Verbosity::Debug => &[
                "patchbay=debug",
                "patchbay::ws::ping=off",
                "tower_http=debug",
            ],
            Verbosity::Trace => &["patchbay=trace", "tower_http=trace"],
        }
    }
}

/// Resolved logging options, built once from the CLI.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub verbosity: Verbosity,
    /// Normalized `target=level` directives, appended after the preset
    /// so they win for the targets they name.
    pub overrides: Vec<String>,
    pub format: LogFormat,
}

impl LogConfig {
    pub fn from_cli(
        verbose: bool,
        debug: bool,
        trace: bool,
        quiet: bool,
        raw_overrides: Vec<String>,
        format: LogFormat,
    ) -> Self {
        let mut overrides = Vec::new();
        for raw in &raw_overrides {
            for part in raw.split(',') {
                match normalize_override(part) {
                    Some(directive) => overrides.push(directive),
                    None => eprintln!("ignoring malformed --log override '{}'", part.trim()),
                }
            }
        }
        Self {
            verbosity: Verbosity::from_flags(verbose, debug, trace, quiet),
            overrides,
            format,
        }
    }

    /// The filter to install. `RUST_LOG`, when set, replaces it.
    pub fn filter(&self) -> EnvFilter {
        if let Ok(from_env) = EnvFilter::try_from_default_env() {
            return from_env;
        }
        let directives: Vec<&str> = self
            .verbosity
            .directives()
            .iter()
            .copied()
            .chain(self.overrides.iter().map(String::as_str))
            .collect();
        EnvFilter::try_new(directives.join(",")).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Turn one `target=level` pair into a filter directive, or `None` if
/// either half is unusable. Bare targets are rooted under `patchbay::`;
/// already-qualified ones and the `tower_http` middleware pass through.
fn normalize_override(part: &str) -> Option<String> {
    let (target, level) = part.split_once('=')?;
    let target = target.trim();
    let level = level.trim().to_lowercase();
    if target.is_empty() {
        return None;
    }
    if !matches!(
        level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    ) {
        return None;
    }
    if target == "tower_http" || target.starts_with("patchbay") {
        Some(format!("{target}={level}"))
    } else {
        Some(format!("patchbay::{target}={level}"))
    }
}

/// Install the global subscriber.
pub fn init(config: &LogConfig) {
    let registry = tracing_subscriber::registry().with(config.filter());
    match config.format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
    }
}
