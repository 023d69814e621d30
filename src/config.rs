use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

const DEFAULT_MAX_SESSIONS: usize = 64;
const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8079";
const DEFAULT_TESSELLATION_QUALITY: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[value(alias = "stream-http", alias = "stream_http")]
    #[serde(alias = "stream-http", alias = "stream_http")]
    Http,
    Stdio,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Http => write!(f, "http"),
            TransportKind::Stdio => write!(f, "stdio"),
        }
    }
}

/// Geometry backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelBackend {
    /// Built-in analytic backend for planar-profile solids.
    Planar,
    /// No backend; every geometry request reports KernelUnavailable.
    Null,
}

impl std::fmt::Display for KernelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelBackend::Planar => write!(f, "planar"),
            KernelBackend::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub transport: TransportKind,
    pub http_bind_address: SocketAddr,
    pub kernel_backend: KernelBackend,
    pub max_sessions: usize,
    pub default_quality: f64,
    pub enabled_tools: Option<HashSet<String>>,
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            transport: cli_transport,
            http_bind: cli_http_bind,
            kernel: cli_kernel,
            max_sessions: cli_max_sessions,
            default_quality: cli_default_quality,
            enabled_tools: cli_enabled_tools,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            transport: file_transport,
            http_bind: file_http_bind,
            kernel: file_kernel,
            max_sessions: file_max_sessions,
            default_quality: file_default_quality,
            enabled_tools: file_enabled_tools,
        } = file_config;

        let transport = cli_transport
            .or(file_transport)
            .unwrap_or(TransportKind::Stdio);

        let http_bind_address = cli_http_bind.or(file_http_bind).unwrap_or_else(|| {
            DEFAULT_HTTP_BIND
                .parse()
                .expect("default bind address valid")
        });

        let kernel_backend = cli_kernel.or(file_kernel).unwrap_or(KernelBackend::Planar);

        let max_sessions = cli_max_sessions
            .or(file_max_sessions)
            .unwrap_or(DEFAULT_MAX_SESSIONS)
            .max(1);

        let default_quality = cli_default_quality
            .or(file_default_quality)
            .unwrap_or(DEFAULT_TESSELLATION_QUALITY);

        let enabled_tools = cli_enabled_tools
            .or(file_enabled_tools)
            .map(|tools| {
                tools
                    .into_iter()
                    .map(|tool| tool.to_ascii_lowercase())
                    .filter(|tool| !tool.is_empty())
                    .collect::<HashSet<_>>()
            })
            .filter(|set| !set.is_empty());

        Ok(Self {
            transport,
            http_bind_address,
            kernel_backend,
            max_sessions,
            default_quality,
            enabled_tools,
        })
    }

    /// Fail-fast validation before the server starts serving.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (crate::dispatch::MIN_TESSELLATION_QUALITY..=crate::dispatch::MAX_TESSELLATION_QUALITY)
                .contains(&self.default_quality),
            "default tessellation quality {} outside [{}, {}]",
            self.default_quality,
            crate::dispatch::MIN_TESSELLATION_QUALITY,
            crate::dispatch::MAX_TESSELLATION_QUALITY,
        );
        Ok(())
    }

    pub fn is_tool_enabled(&self, tool: &str) -> bool {
        match &self.enabled_tools {
            Some(set) => set.contains(&tool.to_ascii_lowercase()),
            None => true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            transport: TransportKind::Stdio,
            http_bind_address: DEFAULT_HTTP_BIND.parse().expect("default bind address valid"),
            kernel_backend: KernelBackend::Planar,
            max_sessions: DEFAULT_MAX_SESSIONS,
            default_quality: DEFAULT_TESSELLATION_QUALITY,
            enabled_tools: None,
        }
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "cad-mcp", about = "CAD modeling MCP server", version)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "CAD_MCP_TRANSPORT",
        value_enum,
        value_name = "TRANSPORT",
        help = "Transport to expose (http or stdio)"
    )]
    pub transport: Option<TransportKind>,

    #[arg(
        long,
        env = "CAD_MCP_HTTP_BIND",
        value_name = "ADDR",
        help = "HTTP bind address when using http transport"
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "CAD_MCP_KERNEL",
        value_enum,
        value_name = "BACKEND",
        help = "Geometry kernel backend"
    )]
    pub kernel: Option<KernelBackend>,

    #[arg(
        long,
        env = "CAD_MCP_MAX_SESSIONS",
        value_name = "N",
        help = "Maximum number of concurrently active sessions",
        value_parser = clap::value_parser!(usize)
    )]
    pub max_sessions: Option<usize>,

    #[arg(
        long,
        env = "CAD_MCP_DEFAULT_QUALITY",
        value_name = "Q",
        help = "Default tessellation quality (deflection), in [0.001, 1.0]"
    )]
    pub default_quality: Option<f64>,

    #[arg(
        long,
        env = "CAD_MCP_ENABLED_TOOLS",
        value_name = "TOOL",
        value_delimiter = ',',
        help = "Restrict execution to the provided tool names"
    )]
    pub enabled_tools: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    transport: Option<TransportKind>,
    http_bind: Option<SocketAddr>,
    kernel: Option<KernelBackend>,
    max_sessions: Option<usize>,
    default_quality: Option<f64>,
    enabled_tools: Option<Vec<String>>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
