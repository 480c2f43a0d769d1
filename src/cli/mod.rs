//! Command-line interface for the acoustic monitor.
//!
//! Provides commands for running the monitor, checking policy files,
//! managing offline evidence and showing the resolved configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{Settings, CONFIG_ENV};
use crate::policy::RuleSet;

pub mod evidence;
pub mod run;

/// acoustic-monitor - Edge acoustic security monitor
#[derive(Parser, Debug)]
#[command(name = "acoustic-monitor")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: search for .acoustic-monitor/config.yaml)
    #[arg(short, long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the monitor until the input ends or Ctrl-C
    Run {
        /// WAV file or directory of WAV files to process
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Pace the input at real-time speed
        #[arg(long)]
        realtime: bool,
    },

    /// Work with policy files
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },

    /// Manage offline evidence
    Evidence {
        #[command(subcommand)]
        command: evidence::EvidenceCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommands {
    /// Compile a policy file and list its rules
    Check {
        /// Policy file (default: the configured one)
        file: Option<PathBuf>,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let settings = Settings::load(self.config.as_deref()).context("Failed to load configuration")?;

        match self.command {
            Commands::Run { input, realtime } => run::run(settings, input, realtime).await,
            Commands::Policy {
                command: PolicyCommands::Check { file },
            } => {
                let path = file.unwrap_or_else(|| settings.policy_file());
                check_policy(&path)
            }
            Commands::Evidence { command } => evidence::execute(command, settings).await,
            Commands::Config => show_config(&settings),
        }
    }
}

/// Compile every rule and print a summary
fn check_policy(path: &Path) -> Result<()> {
    let rules = RuleSet::load(path)?;

    println!("Policy file: {}", path.display());
    println!("{} rule(s) compiled", rules.len());
    println!();

    for rule in rules.rules() {
        let actions: Vec<&str> = rule.actions.iter().map(|a| a.as_str()).collect();
        println!("  {}", rule.name);
        if let Some(description) = &rule.description {
            println!("    {}", description);
        }
        println!("    when:    {}", rule.condition_source);
        println!("    actions: {}", actions.join(", "));
        if rule.ignore_privacy {
            println!("    ignores privacy mode");
        }
        if let Some(cooldown) = rule.cooldown {
            println!("    cooldown: {:.0}s", cooldown.as_secs_f64());
        }
    }

    Ok(())
}

/// Print the resolved configuration
fn show_config(settings: &Settings) -> Result<()> {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("  Acoustic Monitor Configuration");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "Config file: {}",
        settings
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Output dir:  {}", settings.output_dir().display());
    println!("Policy file: {}", settings.policy_file().display());
    println!();
    println!("Services:");
    println!("  Cloud upload:  {}", on_off(settings.services.cloud_storage_enabled));
    println!("  Notifications: {}", on_off(settings.services.telegram_enabled));
    println!("  Internet:      {}", on_off(settings.services.internet_enabled));
    println!();

    let yaml = serde_yaml::to_string(settings).context("Failed to render configuration")?;
    println!("{}", yaml);

    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}
