//! Hydra configuration — loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// How a finished build is exposed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServeMode {
    /// Bind a listener on the allocated port and serve the output from here.
    Direct,
    /// Publish the output under `output_dir/<port>` for an external web server.
    External,
}

impl ServeMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(ServeMode::Direct),
            "external" => Some(ServeMode::External),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HydraConfig {
    /// Host name used when building site links.
    pub host_name: String,
    /// Address site listeners and the port probe bind to.
    pub bind_addr: String,
    /// First port of the allocation window.
    pub base_port: u16,
    /// Number of ports in the allocation window.
    pub port_window: u16,
    /// Published site output, one subdirectory per port.
    pub output_dir: PathBuf,
    /// Parent of the per-run scratch directories.
    pub workspace_dir: PathBuf,
    /// Source-control executable.
    pub git_program: String,
    /// Builder argv; `{source}` and `{output}` are substituted per run.
    pub build_command: Vec<String>,
    /// Upper bound on any single external command.
    pub command_timeout: Duration,
    pub serve_mode: ServeMode,
    /// Pipelines allowed in clone/build at the same time.
    pub max_concurrent_builds: usize,
}

pub const DEFAULT_BUILD_COMMAND: &str = "jekyll build -s {source} -d {output}";

impl Default for HydraConfig {
    fn default() -> Self {
        Self {
            host_name: "localhost".to_string(),
            bind_addr: "0.0.0.0".to_string(),
            base_port: 4000,
            port_window: 10,
            output_dir: PathBuf::from("/var/hydra/build"),
            workspace_dir: std::env::temp_dir(),
            git_program: "git".to_string(),
            build_command: split_command(DEFAULT_BUILD_COMMAND),
            command_timeout: Duration::from_secs(600),
            serve_mode: ServeMode::Direct,
            max_concurrent_builds: 4,
        }
    }
}

impl HydraConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host_name = std::env::var("HYDRA_HOST").unwrap_or(defaults.host_name);
        let bind_addr = std::env::var("HYDRA_BIND_ADDR").unwrap_or(defaults.bind_addr);
        let base_port = std::env::var("HYDRA_BASE_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.base_port);
        let port_window = std::env::var("HYDRA_PORT_WINDOW")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.port_window);
        let output_dir = std::env::var("HYDRA_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);
        let workspace_dir = std::env::var("HYDRA_WORKSPACE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_dir);
        let git_program = std::env::var("HYDRA_GIT").unwrap_or(defaults.git_program);
        let build_command = std::env::var("HYDRA_BUILD_COMMAND")
            .ok()
            .map(|s| split_command(&s))
            .filter(|argv| !argv.is_empty())
            .unwrap_or(defaults.build_command);
        let command_timeout = std::env::var("HYDRA_COMMAND_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.command_timeout);
        let serve_mode = std::env::var("HYDRA_SERVE_MODE")
            .ok()
            .and_then(|s| ServeMode::parse(&s))
            .unwrap_or(defaults.serve_mode);
        let max_concurrent_builds = std::env::var("HYDRA_MAX_CONCURRENT")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_concurrent_builds);

        if port_window == 0 {
            tracing::warn!("HYDRA_PORT_WINDOW is 0 -- every allocation will fail");
        }
        if u32::from(base_port) + u32::from(port_window) > u32::from(u16::MAX) + 1 {
            tracing::warn!(
                base_port,
                port_window,
                "Port window runs past 65535 -- upper ports will never be allocated"
            );
        }

        Self {
            host_name,
            bind_addr,
            base_port,
            port_window,
            output_dir,
            workspace_dir,
            git_program,
            build_command,
            command_timeout,
            serve_mode,
            max_concurrent_builds,
        }
    }

    /// Published output for a port.
    pub fn site_dir(&self, port: u16) -> PathBuf {
        self.output_dir.join(port.to_string())
    }
}

fn split_command(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}
