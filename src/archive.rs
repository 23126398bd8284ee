//! Archiver: pulls the full entity graph through the transformation pipeline
//! and ships it to object storage as two archives (data, assets), reporting
//! each lifecycle phase through an explicit observer.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use serde_json::Value;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::Config;
use crate::contract::{ContentSource, EventSink, ObjectStore};
use crate::error::{EngineError, Result};
use crate::fetch::{fetch_all_assets, fetch_all_entities};
use crate::progress::{PhaseEvent, PhaseObserver, Phase, ProgressWatcher, RunResult, RunStatus};
use crate::schema::SchemaCatalog;
use crate::transform::{AssetRecord, Discrepancy, EntityGraph, Pipeline};

/// Deflate level for the data archive; assets ship uncompressed.
const DATA_COMPRESSION_LEVEL: i64 = 6;

/// What a completed run produced.
#[derive(Debug)]
pub struct ArchiveSummary {
    pub data_key: String,
    pub assets_key: Option<String>,
    pub entity_counts: BTreeMap<String, u64>,
    pub assets_shipped: u64,
    pub discrepancies: Vec<Discrepancy>,
}

/// One-shot orchestrator over Schema Catalog, Paginated Fetcher,
/// Transformation Pipeline and object storage.
pub struct Archiver<'a> {
    source: &'a dyn ContentSource,
    store: &'a dyn ObjectStore,
    config: &'a Config,
}

impl<'a> Archiver<'a> {
    pub fn new(
        source: &'a dyn ContentSource,
        store: &'a dyn ObjectStore,
        config: &'a Config,
    ) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    /// Run the full pipeline, emitting one event per phase transition. Any
    /// stage failure aborts the run; the terminal event is emitted by the
    /// caller ([`Publisher::publish`]) so the observer always sees a stop.
    async fn run(&self, observer: &dyn PhaseObserver) -> Result<ArchiveSummary> {
        let namespace = self.config.source.namespace.as_str();

        // Load: catalog first (abort before any fetch on bad credentials),
        // then every entity collection, then the asset collection.
        observer.on_phase(&PhaseEvent::of(Phase::LoadStart)).await;
        let mut catalog_loader = SchemaCatalog::new();
        let catalog = catalog_loader.load(self.source, namespace).await?.clone();

        let mut graph = EntityGraph::new();
        let mut entity_counts = BTreeMap::new();
        for entity_type in &self.config.entity_types {
            let records =
                fetch_all_entities(self.source, namespace, entity_type, None, None).await?;
            entity_counts.insert(entity_type.clone(), records.len() as u64);
            graph.insert(entity_type.clone(), Value::Array(records));
        }
        let mut assets = parse_assets(fetch_all_assets(self.source, namespace, None, None).await?);
        observer.on_phase(&PhaseEvent::loaded(entity_counts.clone())).await;

        // Transform.
        observer.on_phase(&PhaseEvent::of(Phase::XformStart)).await;
        let pipeline = Pipeline::new(&catalog, self.config.prune.clone());
        let report = pipeline.run(&mut graph, &mut assets);
        observer.on_phase(&PhaseEvent::of(Phase::XformEnd)).await;

        // Data archive.
        observer.on_phase(&PhaseEvent::of(Phase::ZipDataStart)).await;
        let data_zip = build_data_archive(&graph)?;
        observer.on_phase(&PhaseEvent::of(Phase::ZipDataEnd)).await;

        let data_key = self.config.archive.data_key();
        observer.on_phase(&PhaseEvent::of(Phase::UploadDataStart)).await;
        // Hand the buffer over by value so it is freed right after upload.
        self.store.put_object(&data_key, data_zip).await?;
        observer.on_phase(&PhaseEvent::of(Phase::UploadDataEnd)).await;

        // Asset archive, or the skip leg.
        let mut assets_key = None;
        let mut assets_shipped = 0;
        if self.config.archive.include_assets && !assets.is_empty() {
            observer.on_phase(&PhaseEvent::of(Phase::ZipAssetsStart)).await;
            let assets_zip = self.build_asset_archive(&assets, observer).await?;
            assets_shipped = assets.len() as u64;
            observer.on_phase(&PhaseEvent::of(Phase::ZipAssetsEnd)).await;

            let key = self.config.archive.assets_key();
            observer
                .on_phase(&PhaseEvent::of(Phase::UploadAssetsStart))
                .await;
            self.store.put_object(&key, assets_zip).await?;
            observer
                .on_phase(&PhaseEvent::of(Phase::UploadAssetsEnd))
                .await;
            assets_key = Some(key);
        } else {
            observer.on_phase(&PhaseEvent::of(Phase::AssetsSkipped)).await;
        }

        info!(
            data_key = %data_key,
            assets = assets_shipped,
            discrepancies = report.discrepancies.len(),
            "Archive run complete"
        );
        Ok(ArchiveSummary {
            data_key,
            assets_key,
            entity_counts,
            assets_shipped,
            discrepancies: report.discrepancies,
        })
    }

    /// Retrieve every referenced asset binary sequentially and store it
    /// uncompressed under `audio/` or `images/`.
    async fn build_asset_archive(
        &self,
        assets: &[AssetRecord],
        observer: &dyn PhaseObserver,
    ) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let total = assets.len() as u64;
        for (i, asset) in assets.iter().enumerate() {
            let Some(href) = asset.content_href() else {
                warn!(asset = %asset.id, "Asset has no content href, skipped");
                continue;
            };
            let bytes = self
                .source
                .fetch_asset_binary(href, Some(asset.version))
                .await?;
            let entry = format!("{}/{}", asset.archive_folder(), asset.file_name);
            writer
                .start_file(entry, options)
                .map_err(|e| EngineError::Archive(e.to_string()))?;
            writer.write_all(&bytes)?;
            observer
                .on_phase(&PhaseEvent::asset_loaded(i as u64 + 1, total))
                .await;
        }
        writer
            .finish()
            .map_err(|e| EngineError::Archive(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}

/// Serialize the graph into the data archive: one JSON entry per entity-type
/// key, moderately compressed.
pub fn build_data_archive(graph: &EntityGraph) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = ZipWriter::new(&mut cursor);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(DATA_COMPRESSION_LEVEL));
    for (entity_type, records) in graph.iter() {
        writer
            .start_file(format!("{entity_type}.json"), options)
            .map_err(|e| EngineError::Archive(e.to_string()))?;
        let bytes = serde_json::to_vec_pretty(records)?;
        writer.write_all(&bytes)?;
    }
    writer
        .finish()
        .map_err(|e| EngineError::Archive(e.to_string()))?;
    Ok(cursor.into_inner())
}

fn parse_assets(items: Vec<Value>) -> Vec<AssetRecord> {
    let mut assets = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<AssetRecord>(item) {
            Ok(asset) => assets.push(asset),
            Err(e) => warn!(error = %e, "Skipping undecodable asset record"),
        }
    }
    assets
}

/// Owns the Archiver's collaborators and the Progress Watcher, and with them
/// the "only one run active" invariant. Both interactive and scheduled
/// publishes go through [`Publisher::publish`].
pub struct Publisher<'a, S: EventSink> {
    source: &'a dyn ContentSource,
    store: &'a dyn ObjectStore,
    config: &'a Config,
    watcher: ProgressWatcher<S>,
}

impl<'a, S: EventSink> Publisher<'a, S> {
    pub fn new(
        source: &'a dyn ContentSource,
        store: &'a dyn ObjectStore,
        config: &'a Config,
        sink: S,
    ) -> Self {
        Self {
            source,
            store,
            config,
            watcher: ProgressWatcher::new(sink),
        }
    }

    /// Run one publish to completion. Rejects overlap with `Conflict` before
    /// doing any work; otherwise always reaches a terminal phase and returns
    /// the run record as a value.
    pub async fn publish(&self) -> Result<(ArchiveSummary, PublishRunOutcome)> {
        self.watcher.begin()?;
        let archiver = Archiver::new(self.source, self.store, self.config);
        let result = archiver.run(&self.watcher).await;
        match result {
            Ok(summary) => {
                self.watcher
                    .on_phase(&PhaseEvent::stopped(RunResult::Success, None))
                    .await;
                let run = self.watcher.status().status;
                Ok((summary, PublishRunOutcome { run }))
            }
            Err(e) => {
                let rendered = e.render();
                self.watcher
                    .on_phase(&PhaseEvent::stopped(
                        RunResult::Failure,
                        Some(format!("[{}] {} ({})", rendered.id, rendered.message, rendered.code)),
                    ))
                    .await;
                Err(e)
            }
        }
    }

    /// Status surface: `{active, status}` readable at any time.
    pub fn status(&self) -> RunStatus {
        self.watcher.status()
    }
}

/// Terminal run record handed back to the caller, which is expected to
/// persist any "published" marker against its own course record.
#[derive(Debug, Clone)]
pub struct PublishRunOutcome {
    pub run: crate::progress::PublishRun,
}
