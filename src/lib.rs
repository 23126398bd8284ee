//! Content migration and bulk-edit engine.
//!
//! This crate pulls a full, paginated entity graph out of a headless content
//! source, runs it through a fixed pipeline of schema-driven transformation
//! passes and re-packages the result into archives for downstream delivery.
//! It also exposes a wildcard-path query/edit tool for locating and mutating
//! arbitrary sub-trees of that same graph with small, sandboxed rules.
//!
//! # Usage
//! Library consumers wire their own [`contract::ContentSource`],
//! [`contract::ObjectStore`] and [`contract::EventSink`] implementations into
//! [`archive::Publisher`] and [`edit::run_bulk_edit`]; the CLI in `main.rs`
//! wires the HTTP source and a filesystem store.

pub mod archive;
pub mod config;
pub mod contract;
pub mod edit;
pub mod error;
pub mod fetch;
pub mod path;
pub mod progress;
pub mod rule;
pub mod schema;
pub mod source;
pub mod store;
pub mod transform;

use std::path::PathBuf;

use anyhow::Result;
use chrono::DateTime;
use clap::{Parser, Subcommand};

use archive::Publisher;
use config::load_config;
use edit::{check_unpublished, run_bulk_edit, BulkEditSpec};
use progress::LogEventSink;
use source::HttpContentSource;
use store::FsObjectStore;

#[derive(Parser)]
#[clap(
    name = "course-porter",
    version,
    about = "Export a CMS entity graph through the transformation pipeline, or bulk-edit it with wildcard-path rules"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a full publish: load, transform, archive and upload
    Publish {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Root directory the archive objects are stored under
        #[clap(long, default_value = "out")]
        out: PathBuf,
    },
    /// Select and optionally mutate sub-trees via a wildcard path and rules
    Edit {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Dot-separated select path, e.g. topic[*].parts[*]
        #[clap(long)]
        select_path: String,
        /// Select rule body, e.g. "return $node === 'Leg'"
        #[clap(long)]
        select_rule: String,
        /// Edit path; defaults to the select path
        #[clap(long)]
        edit_path: Option<String>,
        /// Edit rule body, e.g. "$node = upper($node)"
        #[clap(long)]
        edit_rule: Option<String>,
    },
    /// Count records modified after the given RFC 3339 timestamp, per type
    CheckUnpublished {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Timestamp, e.g. 2026-08-01T00:00:00Z
        #[clap(long)]
        since: String,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Publish { config, out } => {
            let config = load_config(config)?;
            let source = HttpContentSource::new(config.source.clone());
            let store = FsObjectStore::new(out);
            let publisher = Publisher::new(&source, &store, &config, LogEventSink);
            println!("Publish starting...");
            match publisher.publish().await {
                Ok((summary, outcome)) => {
                    println!("Publish complete.\nReport:");
                    println!("{summary:#?}");
                    println!("{:#?}", outcome.run);
                    Ok(())
                }
                Err(e) => {
                    let rendered = e.render();
                    eprintln!(
                        "[ERROR] Publish failed: {} ({}, id {})",
                        rendered.message, rendered.code, rendered.id
                    );
                    Err(anyhow::Error::msg(rendered.message))
                }
            }
        }
        Commands::Edit {
            config,
            select_path,
            select_rule,
            edit_path,
            edit_rule,
        } => {
            let config = load_config(config)?;
            let source = HttpContentSource::new(config.source.clone());
            let spec = BulkEditSpec {
                select_path,
                select_rule,
                edit_path,
                edit_rule,
            };
            match run_bulk_edit(&source, &config.source.namespace, &spec).await {
                Ok(log) => {
                    println!("{log}");
                    Ok(())
                }
                Err(e) => {
                    let rendered = e.render();
                    eprintln!(
                        "[ERROR] Bulk edit failed: {} ({}, id {})",
                        rendered.message, rendered.code, rendered.id
                    );
                    Err(anyhow::Error::msg(rendered.message))
                }
            }
        }
        Commands::CheckUnpublished { config, since } => {
            let config = load_config(config)?;
            let source = HttpContentSource::new(config.source.clone());
            let since = DateTime::parse_from_rfc3339(&since)
                .map_err(|e| anyhow::anyhow!("bad --since timestamp: {e}"))?
                .with_timezone(&chrono::Utc);
            let counts =
                check_unpublished(&source, &config.source.namespace, &config.entity_types, since)
                    .await?;
            for (entity_type, count) in counts {
                println!("{entity_type}: {count}");
            }
            Ok(())
        }
    }
}
