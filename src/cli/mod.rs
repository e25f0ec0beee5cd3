//! Command-line interface for durabatch.
//!
//! Provides commands for running a batch, checking instance status,
//! listing instances, resuming interrupted instances and showing config.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::adapters::{FsObjectStore, HttpClassifier};
use crate::config;
use crate::core::{EventStore, InstanceRegistry};
use crate::domain::{Instance, InstanceParams, InstanceStatus};

/// durabatch - Durable batch classification orchestrator
#[derive(Parser, Debug)]
#[command(name = "durabatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an instance and process it to completion
    Run {
        /// Key prefix selecting the work items (defaults to batch.default_prefix)
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Check the status of an instance
    Status {
        /// Instance ID (UUID)
        instance_id: String,
    },

    /// List recent instances
    Instances {
        /// Maximum number of instances to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Continue an interrupted instance
    Resume {
        /// Instance ID to resume
        instance_id: String,
    },

    /// Show resolved configuration (paths, policies, classifier)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run { prefix } => run_batch(prefix).await,
            Commands::Status { instance_id } => show_status(&instance_id).await,
            Commands::Instances { limit } => list_instances(limit).await,
            Commands::Resume { instance_id } => resume_instance(&instance_id).await,
            Commands::Config => show_config(),
        }
    }
}

/// Build a registry over the configured ledger, object store and classifier
fn open_registry() -> Result<InstanceRegistry> {
    let cfg = config::config()?;

    Ok(InstanceRegistry::new(
        Arc::new(EventStore::open_default()?),
        Arc::new(FsObjectStore::open_default()?),
        Arc::new(HttpClassifier::from_config()?),
        cfg.batch.clone(),
    ))
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("Invalid instance ID: {}", id))
}

/// Create an instance and wait for it in the foreground
async fn run_batch(prefix: Option<String>) -> Result<()> {
    let registry = open_registry()?;
    let prefix = prefix.unwrap_or_else(|| registry.settings().default_prefix.clone());

    let created = registry.create(InstanceParams::new(prefix)).await?;
    eprintln!("[Instance {} started]", created.id);

    let instance = registry.wait(created.id).await?;
    report(&instance)
}

/// Show the status of an instance
async fn show_status(id: &str) -> Result<()> {
    let registry = open_registry()?;
    let snapshot = registry.status(parse_id(id)?).await?;

    println!("Instance ID: {}", snapshot.id);
    println!("Status: {}", snapshot.status);
    println!("Created: {}", snapshot.created_at);
    if let Some(finished) = snapshot.finished_at {
        println!("Finished: {}", finished);
    }

    if !snapshot.steps.is_empty() {
        println!("\nSteps:");
        for (step, record) in &snapshot.steps {
            print!("  {}: {:?} (attempt {})", step, record.state, record.attempt);
            match record.last_error {
                Some(ref error) => println!(" - {}", error),
                None => println!(),
            }
        }
    }

    if let Some(ref result) = snapshot.result {
        println!(
            "\nProcessed {}/{} items",
            result.processed_count, result.summary.total_items
        );
        for failure in &result.failures {
            println!("  failed {} at {}: {}", failure.key, failure.step, failure.error);
        }
    }
    if let Some(ref error) = snapshot.error {
        println!("\nError: {}", error);
    }

    Ok(())
}

/// List recent instances
async fn list_instances(limit: usize) -> Result<()> {
    let registry = open_registry()?;
    let instances = registry.list(limit).await?;

    if instances.is_empty() {
        println!("No instances found");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<10} {:<10}", "INSTANCE ID", "PREFIX", "STATUS", "ITEMS");
    println!("{}", "-".repeat(80));

    for instance in instances {
        let items = instance
            .result
            .as_ref()
            .map(|r| format!("{}/{}", r.processed_count, r.summary.total_items))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<20} {:<10} {:<10}",
            instance.id, instance.params.prefix, instance.status, items
        );
    }

    Ok(())
}

/// Resume an instance and wait for it
async fn resume_instance(id: &str) -> Result<()> {
    let registry = open_registry()?;
    let id = parse_id(id)?;

    let existing = registry.resume(id).await?;
    if existing.status.is_terminal() {
        eprintln!("[Instance {} already {}]", id, existing.status);
        return report(&existing);
    }

    let instance = registry.wait(id).await?;
    report(&instance)
}

/// Print the outcome of a finished instance
fn report(instance: &Instance) -> Result<()> {
    match instance.status {
        InstanceStatus::Completed => {
            if let Some(ref result) = instance.result {
                println!(
                    "{}",
                    serde_json::to_string_pretty(result).context("Failed to render batch result")?
                );
            }
            eprintln!("\n[Instance {} completed]", instance.id);
        }
        InstanceStatus::Errored => {
            eprintln!(
                "\n[Instance {} errored: {}]",
                instance.id,
                instance.error.as_deref().unwrap_or("unknown error")
            );
            std::process::exit(1);
        }
        InstanceStatus::Running => {
            eprintln!("\n[Instance {} still running; use `durabatch resume`]", instance.id);
        }
    }

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("durabatch configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (engine state): {}", cfg.home.display());
    println!("  Instances:           {}", config::instances_dir()?.display());
    println!("  Objects:             {}", cfg.objects.display());
    println!();
    println!("Batch:");
    println!("  Default prefix: {}", cfg.batch.default_prefix);
    println!("  List retry:     {}", describe_policy(&cfg.batch.list_retry));
    println!("  Update retry:   {}", describe_policy(&cfg.batch.update_retry));
    println!();
    println!("Classifier:");
    println!("  Endpoint: {}", cfg.classifier.endpoint);
    println!("  Timeout:  {}s", cfg.classifier.timeout_seconds);
    println!(
        "  Token:    {}",
        if cfg.classifier.token.is_some() { "set" } else { "(none)" }
    );

    Ok(())
}

fn describe_policy(policy: &crate::core::RetryPolicy) -> String {
    let mut text = format!(
        "{} attempt(s), {:?} backoff from {}ms",
        policy.limit, policy.backoff, policy.delay_ms
    );
    if let Some(cap) = policy.max_delay_ms {
        text.push_str(&format!(", capped at {}ms", cap));
    }
    if let Some(timeout) = policy.timeout_ms {
        text.push_str(&format!(", {}ms timeout", timeout));
    }
    text
}
