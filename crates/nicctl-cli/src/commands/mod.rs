//! CLI command definitions and dispatch.

pub mod links;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use nicctl_common::config::ControllerConfig;

/// nicctl — binds host links to workload network namespaces.
#[derive(Parser, Debug)]
#[command(name = "nicctl", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file; flags override its values.
    #[arg(long, global = true, env = "NICCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Name prefix of the host links to manage.
    #[arg(long = "tor-interface-prefix", global = true, env = "NICCTL_INTERFACE_PREFIX")]
    pub interface_prefix: Option<String>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the controller, applying workload events until stopped.
    Run(run::RunArgs),
    /// List the host links the controller would manage.
    Links(links::LinksArgs),
}

impl Cli {
    /// Builds the controller configuration from the config file and the
    /// global flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be loaded.
    pub fn base_config(&self) -> anyhow::Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::load(path)?,
            None => ControllerConfig::default(),
        };
        if let Some(prefix) = &self.interface_prefix {
            config.interface_prefix.clone_from(prefix);
        }
        Ok(config)
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.base_config()?;
    match cli.command {
        Command::Run(args) => run::execute(args, config),
        Command::Links(args) => links::execute(&args, &config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn prefix_flag_overrides_default() {
        let cli = Cli::try_parse_from(["nicctl", "--tor-interface-prefix", "ens", "links"])
            .unwrap_or_else(|e| panic!("{e}"));
        let config = cli.base_config().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(config.interface_prefix, "ens");
    }
}
