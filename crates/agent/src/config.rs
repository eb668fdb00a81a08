//! Agent configuration
//!
//! Layered lowest to highest: built-in defaults, optional config file,
//! `DOCKER_STATS_*` environment variables, command-line flags.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use monitor_core::evaluate::{Limit, Limits};
use monitor_core::reporting::{NscaConfig, ReporterConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "DOCKER_STATS";

const HOSTNAME_FILES: &[&str] = &["/proc/sys/kernel/hostname", "/etc/hostname"];

/// Command-line flags
#[derive(Debug, Default, Parser)]
#[command(name = "docker-stats")]
#[command(author, version, about = "Polls Docker container stats and reports host status to Nagios", long_about = None)]
pub struct Cli {
    /// Config file (TOML, YAML or JSON)
    #[arg(long, env = "DOCKER_STATS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Warning percentage limit for CPU usage
    #[arg(long)]
    pub warn_cpu: Option<f64>,

    /// Critical percentage limit for CPU usage
    #[arg(long)]
    pub critical_cpu: Option<f64>,

    /// Warning percentage limit for RAM usage
    #[arg(long)]
    pub warn_ram: Option<f64>,

    /// Critical percentage limit for RAM usage
    #[arg(long)]
    pub critical_ram: Option<f64>,

    /// Warning limit for disk reads per cycle, in MiB
    #[arg(long)]
    pub warn_disk: Option<f64>,

    /// Critical limit for disk reads per cycle, in MiB
    #[arg(long)]
    pub critical_disk: Option<f64>,

    /// Warning limit for network traffic per cycle in both directions, in KiB
    #[arg(long)]
    pub warn_net: Option<f64>,

    /// Critical limit for network traffic per cycle in both directions, in KiB
    #[arg(long)]
    pub critical_net: Option<f64>,

    #[arg(long)]
    pub warn_net_in: Option<f64>,

    #[arg(long)]
    pub critical_net_in: Option<f64>,

    #[arg(long)]
    pub warn_net_out: Option<f64>,

    #[arg(long)]
    pub critical_net_out: Option<f64>,

    /// Docker socket URL, e.g. unix:///var/run/docker.sock
    #[arg(short = 'u', long = "url")]
    pub url: Option<String>,

    /// Absolute path of the stats log file
    #[arg(short = 'l', long)]
    pub log_path: Option<PathBuf>,

    /// Delay in seconds between polls
    #[arg(short = 'd', long)]
    pub delay: Option<u64>,

    /// Reporting backend
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Nagios server receiving passive checks
    #[arg(long)]
    pub nagios_server: Option<String>,

    /// Port for the health and metrics endpoints
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Host name reported to Nagios
    #[arg(long)]
    pub hostname: Option<String>,

    /// Write container environment variables to the stats log
    #[arg(long)]
    pub log_container_env: bool,
}

/// Reporting backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Submit passive checks through send_nsca
    Nagios,
    /// Only log, report nowhere
    #[default]
    None,
}

/// Warning and critical values of one resource
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LimitSettings {
    pub warning: f64,
    pub critical: f64,
}

impl LimitSettings {
    fn from_limit(limit: Limit) -> Self {
        Self {
            warning: limit.warning(),
            critical: limit.critical(),
        }
    }

    fn override_with(&mut self, warning: Option<f64>, critical: Option<f64>) {
        if let Some(warning) = warning {
            self.warning = warning;
        }
        if let Some(critical) = critical {
            self.critical = critical;
        }
    }

    fn to_limit(self, resource: &str) -> Result<Limit> {
        Limit::new(self.warning, self.critical)
            .with_context(|| format!("Invalid {} limits", resource))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LimitsSettings {
    pub cpu: LimitSettings,
    pub ram: LimitSettings,
    pub disk: LimitSettings,
    pub net_in: LimitSettings,
    pub net_out: LimitSettings,
}

impl Default for LimitsSettings {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            cpu: LimitSettings::from_limit(limits.cpu),
            ram: LimitSettings::from_limit(limits.ram),
            disk: LimitSettings::from_limit(limits.disk),
            net_in: LimitSettings::from_limit(limits.net_in),
            net_out: LimitSettings::from_limit(limits.net_out),
        }
    }
}

/// NSCA backend settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NagiosSettings {
    #[serde(default)]
    pub server: Option<String>,

    #[serde(default = "default_send_nsca_path")]
    pub send_nsca_path: PathBuf,

    /// Optional send_nsca.cfg
    #[serde(default)]
    pub send_nsca_config: Option<PathBuf>,

    #[serde(default = "default_service_description")]
    pub service_description: String,

    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,
}

impl Default for NagiosSettings {
    fn default() -> Self {
        Self {
            server: None,
            send_nsca_path: default_send_nsca_path(),
            send_nsca_config: None,
            service_description: default_service_description(),
            submit_timeout_secs: default_submit_timeout(),
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name used in agent log records, defaults to the host name
    #[serde(default)]
    pub node_name: Option<String>,

    /// Host name reported to Nagios
    #[serde(default)]
    pub hostname: Option<String>,

    /// Docker socket path or `unix://` URL, auto-detected when unset
    #[serde(default)]
    pub docker_socket: Option<String>,

    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Seconds between polls
    #[serde(default = "default_delay")]
    pub delay_secs: u64,

    /// Seconds allowed for one Docker API request
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default)]
    pub log_container_env: bool,

    /// Health and metrics server port, disabled when unset
    #[serde(default)]
    pub api_port: Option<u16>,

    #[serde(default)]
    pub backend: Backend,

    #[serde(default)]
    pub nagios: NagiosSettings,

    #[serde(default)]
    pub limits: LimitsSettings,
}

fn default_log_path() -> PathBuf {
    PathBuf::from("/var/log/docker-stats.log")
}

fn default_delay() -> u64 {
    2
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_send_nsca_path() -> PathBuf {
    PathBuf::from("/usr/sbin/send_nsca")
}

fn default_service_description() -> String {
    monitor_core::reporting::DEFAULT_SERVICE_DESCRIPTION.to_string()
}

fn default_submit_timeout() -> u64 {
    10
}

impl AgentConfig {
    /// Load configuration from the config file, environment and flags
    pub fn load(cli: &Cli) -> Result<Self> {
        Self::load_with_env(cli, None)
    }

    /// Load with `env` standing in for the process environment when set
    fn load_with_env(cli: &Cli, env: Option<config::Map<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        let defaults = LimitsSettings::default();
        for (name, limit) in [
            ("cpu", defaults.cpu),
            ("ram", defaults.ram),
            ("disk", defaults.disk),
            ("net_in", defaults.net_in),
            ("net_out", defaults.net_out),
        ] {
            builder = builder
                .set_default(format!("limits.{name}.warning"), limit.warning)?
                .set_default(format!("limits.{name}.critical"), limit.critical)?;
        }
        if let Some(path) = &cli.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let mut config: AgentConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.apply_cli(cli);
        config.validate()?;

        Ok(config)
    }

    /// Let command-line flags override loaded values
    pub fn apply_cli(&mut self, cli: &Cli) {
        let limits = &mut self.limits;
        limits.cpu.override_with(cli.warn_cpu, cli.critical_cpu);
        limits.ram.override_with(cli.warn_ram, cli.critical_ram);
        limits.disk.override_with(cli.warn_disk, cli.critical_disk);
        limits.net_in.override_with(cli.warn_net, cli.critical_net);
        limits.net_out.override_with(cli.warn_net, cli.critical_net);
        limits.net_in.override_with(cli.warn_net_in, cli.critical_net_in);
        limits.net_out.override_with(cli.warn_net_out, cli.critical_net_out);

        if let Some(url) = &cli.url {
            self.docker_socket = Some(url.clone());
        }
        if let Some(path) = &cli.log_path {
            self.log_path = path.clone();
        }
        if let Some(delay) = cli.delay {
            self.delay_secs = delay;
        }
        if let Some(backend) = cli.backend {
            self.backend = backend;
        }
        if let Some(server) = &cli.nagios_server {
            self.nagios.server = Some(server.clone());
        }
        if let Some(port) = cli.api_port {
            self.api_port = Some(port);
        }
        if let Some(hostname) = &cli.hostname {
            self.hostname = Some(hostname.clone());
        }
        if cli.log_container_env {
            self.log_container_env = true;
        }
    }

    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.delay_secs == 0 {
            anyhow::bail!("delay_secs must be at least 1");
        }
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be at least 1");
        }
        if !self.log_path.is_absolute() {
            anyhow::bail!("log_path must be absolute: {}", self.log_path.display());
        }
        if self.backend == Backend::Nagios && self.nagios.server.is_none() {
            anyhow::bail!("the nagios backend needs nagios.server (or --nagios-server)");
        }
        self.limits()?;
        Ok(())
    }

    pub fn limits(&self) -> Result<Limits> {
        let settings = &self.limits;
        Ok(Limits {
            cpu: settings.cpu.to_limit("CPU")?,
            ram: settings.ram.to_limit("RAM")?,
            disk: settings.disk.to_limit("disk")?,
            net_in: settings.net_in.to_limit("inbound network")?,
            net_out: settings.net_out.to_limit("outbound network")?,
        })
    }

    /// Configured host name, else the kernel's
    pub fn resolved_hostname(&self) -> String {
        match &self.hostname {
            Some(hostname) => hostname.clone(),
            None => read_hostname(HOSTNAME_FILES),
        }
    }

    pub fn resolved_node_name(&self) -> String {
        self.node_name
            .clone()
            .unwrap_or_else(|| self.resolved_hostname())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Backend selection handed to the reporting layer
    pub fn reporter_config(&self, hostname: &str) -> Result<ReporterConfig> {
        match self.backend {
            Backend::None => Ok(ReporterConfig::Disabled),
            Backend::Nagios => {
                let server = self
                    .nagios
                    .server
                    .clone()
                    .context("nagios.server is not set")?;
                let mut nsca = NscaConfig::new(server, hostname);
                nsca.service_description = self.nagios.service_description.clone();
                nsca.send_nsca_path = self.nagios.send_nsca_path.clone();
                nsca.send_nsca_config = self.nagios.send_nsca_config.clone();
                nsca.submit_timeout = Duration::from_secs(self.nagios.submit_timeout_secs);
                Ok(ReporterConfig::Nsca(nsca))
            }
        }
    }
}

/// First non-empty line among `files`, or `unknown`
fn read_hostname<P: AsRef<Path>>(files: &[P]) -> String {
    files
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|contents| contents.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
