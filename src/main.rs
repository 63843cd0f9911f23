#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::style)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use panelkit::cli::{Args, Command};
use panelkit::config::PanelsConfig;
use panelkit::helpers::{prompt_inbound, read_source};
use panelkit::model::Plan;
use panelkit::service::{MemoryInboundCache, PanelService};
use panelkit::uri::decode_subscription;
use serde::Serialize;
use tracing::Level;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let is_verbose = args.verbose;
    tracing_subscriber::fmt()
        .with_max_level(if is_verbose {
            Level::TRACE
        } else {
            Level::INFO
        })
        .init();

    if let Err(e) = run(args).await {
        tracing::error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    if let Command::Decode { source } = &args.command {
        return decode(source).await;
    }

    tracing::info!("Loading panels config from: {}", args.config);
    let config = PanelsConfig::load(&args.config).await?;
    let settings = config.settings.clone();
    let service =
        PanelService::new(config, settings).with_cache(Arc::new(MemoryInboundCache::default()));

    match args.command {
        Command::Inbounds { panel } => {
            let inbounds = service
                .list_inbounds(&panel)
                .await
                .with_context(|| format!("Failed to list inbounds of panel {}", panel))?;
            for inbound in &inbounds {
                println!(
                    "{}\t{}\t{}/{}/{}\t:{}\t{} clients",
                    inbound.id,
                    inbound.display_name(),
                    inbound.protocol,
                    inbound.network,
                    inbound.security,
                    inbound.port,
                    inbound.clients.len()
                );
            }
        }
        Command::Provision {
            panel,
            inbound,
            quota_gb,
            days,
        } => {
            let inbound = match inbound {
                Some(inbound) => inbound,
                None => pick_inbound(&service, &panel).await?,
            };
            let provisioned = service
                .provision(&panel, &inbound, &Plan::new(quota_gb, days))
                .await
                .with_context(|| format!("Failed to provision a client on panel {}", panel))?;
            tracing::info!("Provisioned client: {}", provisioned.owner_label);
            print_json(&provisioned)?;
        }
        Command::Renew {
            panel,
            inbound,
            label,
            quota_gb,
            days,
        } => {
            let renewed = service
                .renew(&panel, &inbound, &label, &Plan::new(quota_gb, days))
                .await
                .with_context(|| format!("Failed to renew {} on panel {}", label, panel))?;
            print_json(&renewed)?;
        }
        Command::Rotate {
            panel,
            inbound,
            label,
        } => {
            let rotated = service
                .rotate_key(&panel, &inbound, &label)
                .await
                .with_context(|| format!("Failed to rotate {} on panel {}", label, panel))?;
            print_json(&rotated)?;
        }
        Command::Status { panel, label } => {
            let status = service
                .status(&panel, &label)
                .await
                .with_context(|| format!("Failed to read status of {} on panel {}", label, panel))?;
            print_json(&status)?;
        }
        Command::Clients { panel } => {
            let clients = service
                .list_all_clients(&panel)
                .await
                .with_context(|| format!("Failed to list clients of panel {}", panel))?;
            print_json(&clients)?;
        }
        Command::Decode { .. } => {}
    }

    Ok(())
}

/// Account-level panels need no inbound; otherwise ask the operator
async fn pick_inbound(
    service: &PanelService<PanelsConfig>,
    panel: &str,
) -> anyhow::Result<String> {
    if !service.capabilities(panel)?.create_on_inbound {
        return Ok(String::new());
    }
    let inbounds = service
        .list_inbounds(panel)
        .await
        .with_context(|| format!("Failed to list inbounds of panel {}", panel))?;
    prompt_inbound(&inbounds).context("No inbound selected")
}

async fn decode(source: &str) -> anyhow::Result<()> {
    let body = read_source(source)
        .await
        .with_context(|| format!("Failed to read subscription from {}", source))?;

    let uris = decode_subscription(&body);
    tracing::info!("Decoded {} connection URI(s)", uris.len());
    for uri in uris {
        println!("{}", uri);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
