//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::render::ImageFormat;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tratto";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SCRATCH_DIR: &str = "/tmp/tratto-scratch";
const DEFAULT_THEME: &str = "neutral";
const DEFAULT_WIDTH: u32 = 1200;
const DEFAULT_HEIGHT: u32 = 800;
const DEFAULT_MERMAID_CLI_PATH: &str = "mmdc";
const DEFAULT_MERMAID_JS_URL: &str =
    "https://cdn.jsdelivr.net/npm/mermaid@11/dist/mermaid.min.js";

/// Command-line arguments for the tratto binary.
#[derive(Debug, Parser)]
#[command(name = "tratto", version, about = "Mermaid diagram render service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TRATTO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the render strategy (chromium|mermaid-cli).
    #[arg(long = "render-strategy", value_name = "STRATEGY")]
    pub render_strategy: Option<String>,

    /// Override the per-request render deadline in seconds.
    #[arg(long = "render-timeout-seconds", value_name = "SECONDS")]
    pub render_timeout_seconds: Option<u64>,

    /// Override the scratch directory used for transient render files.
    #[arg(long = "render-scratch-dir", value_name = "PATH")]
    pub render_scratch_dir: Option<PathBuf>,

    /// Override the captured image format (png|jpeg|webp).
    #[arg(long = "render-format", value_name = "FORMAT")]
    pub render_format: Option<String>,

    /// Toggle transparent backgrounds for PNG captures.
    #[arg(
        long = "render-transparent-background",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub render_transparent_background: Option<bool>,

    /// Override the Mermaid theme.
    #[arg(long = "render-theme", value_name = "THEME")]
    pub render_theme: Option<String>,

    /// Override the render viewport width in pixels.
    #[arg(long = "render-width", value_name = "PIXELS")]
    pub render_width: Option<u32>,

    /// Override the render viewport height in pixels.
    #[arg(long = "render-height", value_name = "PIXELS")]
    pub render_height: Option<u32>,

    /// Override the Mermaid CLI executable path.
    #[arg(long = "render-mermaid-cli-path", value_name = "PATH")]
    pub render_mermaid_cli_path: Option<PathBuf>,

    /// Override the Chromium executable path used by the chromium strategy.
    #[arg(long = "render-chrome-path", value_name = "PATH")]
    pub render_chrome_path: Option<PathBuf>,

    /// Override the Mermaid bundle URL injected into the render harness.
    #[arg(long = "render-mermaid-js-url", value_name = "URL")]
    pub render_mermaid_js_url: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Which rendering backend serves requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStrategy {
    Chromium,
    MermaidCli,
}

impl RenderStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderStrategy::Chromium => "chromium",
            RenderStrategy::MermaidCli => "mermaid-cli",
        }
    }
}

impl FromStr for RenderStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "chromium" => Ok(RenderStrategy::Chromium),
            "mermaid-cli" | "mermaid_cli" => Ok(RenderStrategy::MermaidCli),
            other => Err(format!(
                "unknown render strategy `{other}` (expected `chromium` or `mermaid-cli`)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub strategy: RenderStrategy,
    pub timeout: Duration,
    pub scratch_dir: PathBuf,
    pub format: ImageFormat,
    pub transparent_background: bool,
    pub theme: String,
    pub width: u32,
    pub height: u32,
    pub mermaid_cli_path: PathBuf,
    pub chrome_path: Option<PathBuf>,
    pub mermaid_js_url: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("TRATTO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    render: RawRenderSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(strategy) = overrides.render_strategy.as_ref() {
            self.render.strategy = Some(strategy.clone());
        }
        if let Some(seconds) = overrides.render_timeout_seconds {
            self.render.timeout_seconds = Some(seconds);
        }
        if let Some(dir) = overrides.render_scratch_dir.as_ref() {
            self.render.scratch_dir = Some(dir.clone());
        }
        if let Some(format) = overrides.render_format.as_ref() {
            self.render.format = Some(format.clone());
        }
        if let Some(transparent) = overrides.render_transparent_background {
            self.render.transparent_background = Some(transparent);
        }
        if let Some(theme) = overrides.render_theme.as_ref() {
            self.render.theme = Some(theme.clone());
        }
        if let Some(width) = overrides.render_width {
            self.render.width = Some(width);
        }
        if let Some(height) = overrides.render_height {
            self.render.height = Some(height);
        }
        if let Some(path) = overrides.render_mermaid_cli_path.as_ref() {
            self.render.mermaid_cli_path = Some(path.clone());
        }
        if let Some(path) = overrides.render_chrome_path.as_ref() {
            self.render.chrome_path = Some(path.clone());
        }
        if let Some(url) = overrides.render_mermaid_js_url.as_ref() {
            self.render.mermaid_js_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            render,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let render = build_render_settings(render)?;

        Ok(Self {
            server,
            logging,
            render,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let listen_addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.listen_addr", reason))?;

    Ok(ServerSettings { listen_addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let strategy = match render.strategy {
        Some(value) => RenderStrategy::from_str(value.as_str())
            .map_err(|reason| LoadError::invalid("render.strategy", reason))?,
        None => RenderStrategy::Chromium,
    };

    let timeout_seconds = render
        .timeout_seconds
        .unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "render.timeout_seconds",
            "must be greater than zero",
        ));
    }
    let timeout = Duration::from_secs(timeout_seconds);

    let scratch_dir = render
        .scratch_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRATCH_DIR));
    if scratch_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.scratch_dir",
            "path must not be empty",
        ));
    }

    let format = match render.format {
        Some(value) => ImageFormat::from_str(value.as_str())
            .map_err(|reason| LoadError::invalid("render.format", reason))?,
        None => ImageFormat::Png,
    };
    if strategy == RenderStrategy::MermaidCli && format != ImageFormat::Png {
        return Err(LoadError::invalid(
            "render.format",
            "the mermaid-cli strategy renders PNG only",
        ));
    }

    let theme = render.theme.unwrap_or_else(|| DEFAULT_THEME.to_string());
    if theme.trim().is_empty() {
        return Err(LoadError::invalid("render.theme", "must not be empty"));
    }

    let width = render.width.unwrap_or(DEFAULT_WIDTH);
    if width == 0 {
        return Err(LoadError::invalid(
            "render.width",
            "must be greater than zero",
        ));
    }

    let height = render.height.unwrap_or(DEFAULT_HEIGHT);
    if height == 0 {
        return Err(LoadError::invalid(
            "render.height",
            "must be greater than zero",
        ));
    }

    let mermaid_cli_path = render
        .mermaid_cli_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MERMAID_CLI_PATH));
    if mermaid_cli_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.mermaid_cli_path",
            "path must not be empty",
        ));
    }

    let mermaid_js_url = render
        .mermaid_js_url
        .unwrap_or_else(|| DEFAULT_MERMAID_JS_URL.to_string());
    if mermaid_js_url.trim().is_empty() {
        return Err(LoadError::invalid(
            "render.mermaid_js_url",
            "must not be empty",
        ));
    }

    Ok(RenderSettings {
        strategy,
        timeout,
        scratch_dir,
        format,
        transparent_background: render.transparent_background.unwrap_or(true),
        theme,
        width,
        height,
        mermaid_cli_path,
        chrome_path: render.chrome_path,
        mermaid_js_url,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    strategy: Option<String>,
    timeout_seconds: Option<u64>,
    scratch_dir: Option<PathBuf>,
    format: Option<String>,
    transparent_background: Option<bool>,
    theme: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    mermaid_cli_path: Option<PathBuf>,
    chrome_path: Option<PathBuf>,
    mermaid_js_url: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_to_chromium_png() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.server.listen_addr.port(), DEFAULT_PORT);
        assert_eq!(settings.render.strategy, RenderStrategy::Chromium);
        assert_eq!(settings.render.format, ImageFormat::Png);
        assert_eq!(settings.render.theme, "neutral");
        assert_eq!(settings.render.width, 1200);
        assert_eq!(settings.render.height, 800);
        assert_eq!(
            settings.render.timeout,
            Duration::from_secs(DEFAULT_RENDER_TIMEOUT_SECS)
        );
        assert!(settings.render.transparent_background);
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            render_strategy: Some("mermaid-cli".to_string()),
            ..Default::default()
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.listen_addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.render.strategy, RenderStrategy::MermaidCli);
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn mermaid_cli_strategy_requires_png() {
        let mut raw = RawSettings::default();
        raw.render.strategy = Some("mermaid-cli".to_string());
        raw.render.format = Some("webp".to_string());

        let err = Settings::from_raw(raw).expect_err("format mismatch must be rejected");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "render.format",
                ..
            }
        ));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut raw = RawSettings::default();
        raw.render.timeout_seconds = Some(0);

        let err = Settings::from_raw(raw).expect_err("zero timeout must be rejected");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "render.timeout_seconds",
                ..
            }
        ));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let mut raw = RawSettings::default();
        raw.render.strategy = Some("inkscape".to_string());

        let err = Settings::from_raw(raw).expect_err("unknown strategy must be rejected");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "render.strategy",
                ..
            }
        ));
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "tratto",
            "--server-host",
            "0.0.0.0",
            "--render-strategy",
            "mermaid-cli",
            "--render-timeout-seconds",
            "3",
        ]);

        assert_eq!(args.overrides.server_host.as_deref(), Some("0.0.0.0"));
        assert_eq!(
            args.overrides.render_strategy.as_deref(),
            Some("mermaid-cli")
        );
        assert_eq!(args.overrides.render_timeout_seconds, Some(3));
    }
}
