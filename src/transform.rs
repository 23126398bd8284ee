//! Transformation Pipeline: a fixed, ordered list of schema-driven passes
//! over one exclusively owned entity graph.
//!
//! Pass order matters: locale unwrapping first so every later pass sees flat
//! fields, identifier minting before reference remapping, and empty pruning
//! strictly last so it never removes an id a later pass still needs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PruneConfig;
use crate::schema::Catalog;

/// The entity forest: entity-type name → ordered list of records.
pub type EntityGraph = Map<String, Value>;

/// Per-entity-type id → guid lookup, threaded explicitly through the remap
/// pass so it stays independently testable.
pub type RefIndex = HashMap<String, HashMap<String, String>>;

/// Container field whose items get a denormalized type name attached.
pub const PAGES_AND_ACTIVITIES_FIELD: &str = "pagesAndActivities";
/// Field the denormalized name is written to.
pub const TYPE_NAME_FIELD: &str = "typeName";
/// Well-known list-of-single-element-link-objects field flattened in pass 4.
pub const LINK_LIST_FIELD: &str = "linkedResources";

const SCHEMA_ID_FIELD: &str = "schemaId";
const GUID_FIELD: &str = "guid";
const DATA_FIELD: &str = "data";

/// One asset of the namespace, with the derived `referenced` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(rename = "type", default)]
    pub asset_type: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub links: Value,
    /// True iff at least one record in the graph points at this asset.
    #[serde(rename = "ref", default)]
    pub referenced: bool,
}

impl AssetRecord {
    /// Content-addressed href the binary can be fetched from.
    pub fn content_href(&self) -> Option<&str> {
        self.links.get("content")?.as_str()
    }

    /// Archive folder for the binary: `audio/` or `images/`.
    pub fn archive_folder(&self) -> &'static str {
        if self.asset_type.to_ascii_lowercase().contains("audio") {
            "audio"
        } else {
            "images"
        }
    }
}

/// A non-fatal data-consistency warning raised during a pass.
#[derive(Debug, Clone, Serialize)]
pub struct Discrepancy {
    pub pass: &'static str,
    pub path: String,
    pub message: String,
}

/// Outcome of a full pipeline run over one graph.
#[derive(Debug, Default)]
pub struct TransformReport {
    pub discrepancies: Vec<Discrepancy>,
    pub minted_guids: usize,
    pub remapped_references: usize,
    pub pruned_assets: usize,
}

impl TransformReport {
    fn discrepancy(&mut self, pass: &'static str, path: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(pass, path, %message, "Transformation discrepancy");
        self.discrepancies.push(Discrepancy {
            pass,
            path: path.to_string(),
            message,
        });
    }
}

/// The fixed pass sequence, parameterized by the schema catalog's derived
/// indexes and the prune switches.
pub struct Pipeline<'a> {
    catalog: &'a Catalog,
    prune: PruneConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(catalog: &'a Catalog, prune: PruneConfig) -> Self {
        Self { catalog, prune }
    }

    /// Run every pass, in order, mutating the graph and asset list in place.
    pub fn run(&self, graph: &mut EntityGraph, assets: &mut Vec<AssetRecord>) -> TransformReport {
        let mut report = TransformReport::default();

        info!("Pipeline pass 1: unwrap locale values");
        unwrap_locale_graph(graph);

        info!("Pipeline pass 2: resolve and prune assets");
        self.resolve_assets(graph, assets, &mut report);

        info!("Pipeline pass 3: denormalize display names");
        self.denormalize_type_names(graph, &mut report);

        info!("Pipeline pass 4: flatten reference-array wrappers");
        flatten_link_lists(graph);

        info!("Pipeline pass 5: mint and remap stable identifiers");
        report.minted_guids = mint_guids(graph);
        let index = build_ref_index(graph);
        remap_references(graph, self.catalog, &index, &mut report);

        info!("Pipeline pass 6: normalize booleans");
        self.normalize_booleans(graph);

        info!("Pipeline pass 7: prune empties");
        prune_empties_graph(graph, &self.prune);

        info!(
            minted = report.minted_guids,
            remapped = report.remapped_references,
            pruned_assets = report.pruned_assets,
            discrepancies = report.discrepancies.len(),
            "Pipeline complete"
        );
        report
    }

    /// Pass 2: normalize asset fields to a scalar id, mark the referenced
    /// assets, substitute file names, then drop every unreferenced asset.
    fn resolve_assets(
        &self,
        graph: &mut EntityGraph,
        assets: &mut Vec<AssetRecord>,
        report: &mut TransformReport,
    ) {
        let mut by_id: HashMap<String, (String, bool)> = assets
            .iter()
            .map(|a| (a.id.clone(), (a.file_name.clone(), false)))
            .collect();

        for (type_name, records) in graph.iter_mut() {
            visit_schema_nodes(records, None, type_name, &mut |node, schema_id, path| {
                let Some(asset_fields) = self.catalog.asset_fields_of(schema_id) else {
                    return;
                };
                for field in asset_fields {
                    let Some(value) = node.get_mut(field) else {
                        continue;
                    };
                    // Null / empty / singleton array collapse to one scalar.
                    let id = match &*value {
                        Value::Null => String::new(),
                        Value::String(s) => s.clone(),
                        Value::Array(items) => items
                            .first()
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        _ => continue,
                    };
                    if id.is_empty() {
                        *value = Value::String(String::new());
                        continue;
                    }
                    match by_id.get_mut(&id) {
                        Some((file_name, referenced)) => {
                            *referenced = true;
                            *value = Value::String(file_name.clone());
                        }
                        None => {
                            *value = Value::String(id.clone());
                            report.discrepancy(
                                "assets",
                                &format!("{path}.{field}"),
                                format!("asset '{id}' not found in asset collection"),
                            );
                        }
                    }
                }
            });
        }

        for asset in assets.iter_mut() {
            if let Some((_, referenced)) = by_id.get(&asset.id) {
                asset.referenced = *referenced;
            }
        }
        let before = assets.len();
        assets.retain(|a| a.referenced);
        report.pruned_assets = before - assets.len();
        debug!(
            kept = assets.len(),
            pruned = report.pruned_assets,
            "Asset collection filtered to referenced entries"
        );
    }

    /// Pass 3: attach a human-readable type name to every page/activity item.
    fn denormalize_type_names(&self, graph: &mut EntityGraph, report: &mut TransformReport) {
        for (type_name, records) in graph.iter_mut() {
            visit_objects(records, type_name, &mut |map, path| {
                let Some(Value::Array(items)) = map.get_mut(PAGES_AND_ACTIVITIES_FIELD) else {
                    return;
                };
                for (i, item) in items.iter_mut().enumerate() {
                    let Some(obj) = item.as_object_mut() else {
                        continue;
                    };
                    let schema_id = obj
                        .get(SCHEMA_ID_FIELD)
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    let Some(schema_id) = schema_id else {
                        continue;
                    };
                    match self.catalog.schema_name(&schema_id) {
                        Some(name) => {
                            obj.insert(TYPE_NAME_FIELD.into(), Value::String(name.to_string()));
                        }
                        None => report.discrepancy(
                            "typeName",
                            &format!("{path}.{PAGES_AND_ACTIVITIES_FIELD}[{i}]"),
                            format!("no schema named by id '{schema_id}'"),
                        ),
                    }
                }
            });
        }
    }

    /// Pass 6: coerce every boolean-flagged field; null/absent/false become
    /// `false`, truthy values stay. Applying this twice equals applying once.
    fn normalize_booleans(&self, graph: &mut EntityGraph) {
        for (type_name, records) in graph.iter_mut() {
            visit_schema_nodes(records, None, type_name, &mut |node, schema_id, _path| {
                let Some(boolean_fields) = self.catalog.boolean_fields_of(schema_id) else {
                    return;
                };
                for field in boolean_fields {
                    match node.get_mut(field) {
                        None => {
                            node.insert(field.clone(), Value::Bool(false));
                        }
                        Some(Value::Array(items)) => {
                            for item in items.iter_mut() {
                                *item = Value::Bool(truthy(item));
                            }
                        }
                        Some(value) => {
                            *value = Value::Bool(truthy(value));
                        }
                    }
                }
            });
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::Bool(true) => true,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Pass 1: collapse every object of the exact shape `{"iv": x}` to `x`.
pub fn unwrap_locale_graph(graph: &mut EntityGraph) {
    for records in graph.values_mut() {
        unwrap_locale(records);
    }
}

fn unwrap_locale(value: &mut Value) {
    if let Value::Object(map) = value {
        if map.len() == 1 {
            if let Some(inner) = map.get("iv") {
                *value = inner.clone();
                unwrap_locale(value);
                return;
            }
        }
    }
    match value {
        Value::Object(map) => {
            for v in map.values_mut() {
                unwrap_locale(v);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                unwrap_locale(v);
            }
        }
        _ => {}
    }
}

/// Pass 4: flatten the well-known list of single-element link objects into a
/// plain list of target ids.
pub fn flatten_link_lists(graph: &mut EntityGraph) {
    for (type_name, records) in graph.iter_mut() {
        visit_objects(records, type_name, &mut |map, _path| {
            let Some(Value::Array(items)) = map.get(LINK_LIST_FIELD) else {
                return;
            };
            let flattened: Vec<Value> = items.iter().filter_map(link_target_id).collect();
            map.insert(LINK_LIST_FIELD.into(), Value::Array(flattened));
        });
    }
}

fn link_target_id(link: &Value) -> Option<Value> {
    match link {
        Value::String(_) => Some(link.clone()),
        Value::Array(inner) => inner.first().cloned(),
        Value::Object(map) if map.len() == 1 => {
            let only = map.values().next()?;
            link_target_id(only)
        }
        _ => None,
    }
}

/// Pass 5a: assign a fresh guid to every schema-typed node lacking one.
/// A record's guid is assigned at most once per run: nodes already carrying
/// one (directly or under `data`) are skipped.
pub fn mint_guids(graph: &mut EntityGraph) -> usize {
    let mut minted = 0;
    for records in graph.values_mut() {
        visit_objects_untyped(records, &mut |map| {
            if !map.contains_key(SCHEMA_ID_FIELD) {
                return;
            }
            let has_guid = map.contains_key(GUID_FIELD)
                || map
                    .get(DATA_FIELD)
                    .and_then(|d| d.get(GUID_FIELD))
                    .is_some();
            if !has_guid {
                map.insert(GUID_FIELD.into(), Value::String(Uuid::new_v4().to_string()));
                minted += 1;
            }
        });
    }
    minted
}

/// Build the per-entity-type source-id → guid index from the graph's
/// top-level records.
pub fn build_ref_index(graph: &EntityGraph) -> RefIndex {
    let mut index = RefIndex::new();
    for (type_name, records) in graph.iter() {
        let Some(items) = records.as_array() else {
            continue;
        };
        let entry = index.entry(type_name.clone()).or_default();
        for record in items {
            let id = record.get("id").and_then(Value::as_str);
            let guid = record
                .get(GUID_FIELD)
                .or_else(|| record.get(DATA_FIELD).and_then(|d| d.get(GUID_FIELD)))
                .and_then(Value::as_str);
            if let (Some(id), Some(guid)) = (id, guid) {
                entry.insert(id.to_string(), guid.to_string());
            }
        }
    }
    index
}

/// Pass 5b: rewrite every reference-flagged field from source id to the
/// target record's guid. An id absent from the index is a discrepancy; the
/// original id stays in place.
pub fn remap_references(
    graph: &mut EntityGraph,
    catalog: &Catalog,
    index: &RefIndex,
    report: &mut TransformReport,
) {
    let type_names: Vec<String> = graph.keys().cloned().collect();
    for type_name in type_names {
        let Some(records) = graph.get_mut(&type_name) else {
            continue;
        };
        visit_schema_nodes(records, None, &type_name, &mut |node, schema_id, path| {
            let Some(reference_fields) = catalog.reference_fields_of(schema_id) else {
                return;
            };
            for (field, target_type) in reference_fields {
                let Some(value) = node.get_mut(field) else {
                    continue;
                };
                let targets = index.get(target_type);
                match value {
                    Value::String(id) => {
                        match targets.and_then(|t| t.get(id.as_str())) {
                            Some(guid) => {
                                *value = Value::String(guid.clone());
                                report.remapped_references += 1;
                            }
                            None => report.discrepancy(
                                "references",
                                &format!("{path}.{field}"),
                                format!("no '{target_type}' record with id '{id}'"),
                            ),
                        }
                    }
                    Value::Array(items) => {
                        for (i, item) in items.iter_mut().enumerate() {
                            let Some(id) = item.as_str() else {
                                continue;
                            };
                            match targets.and_then(|t| t.get(id)) {
                                Some(guid) => {
                                    *item = Value::String(guid.clone());
                                    report.remapped_references += 1;
                                }
                                None => {
                                    let id = id.to_string();
                                    report.discrepancy(
                                        "references",
                                        &format!("{path}.{field}[{i}]"),
                                        format!("no '{target_type}' record with id '{id}'"),
                                    )
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        });
    }
}

/// Pass 7: remove configured empty properties; runs last, after every id and
/// guid string is final.
pub fn prune_empties_graph(graph: &mut EntityGraph, prune: &PruneConfig) {
    for records in graph.values_mut() {
        prune_empties(records, prune);
    }
}

fn prune_empties(value: &mut Value, prune: &PruneConfig) {
    match value {
        Value::Object(map) => {
            for v in map.values_mut() {
                prune_empties(v, prune);
            }
            map.retain(|_, v| !is_prunable(v, prune));
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                prune_empties(v, prune);
            }
        }
        _ => {}
    }
}

fn is_prunable(value: &Value, prune: &PruneConfig) -> bool {
    match value {
        Value::Null => prune.drop_null,
        Value::String(s) => prune.drop_empty_string && s.is_empty(),
        Value::Array(items) => prune.drop_empty_array && items.is_empty(),
        _ => false,
    }
}

/// Visit every object node of a subtree, tracking the effective schema id:
/// a node carrying its own `schemaId` supersedes the one inherited from its
/// parent, so nested references resolve against the right lookup tables.
fn visit_schema_nodes<F>(value: &mut Value, inherited: Option<&str>, path: &str, f: &mut F)
where
    F: FnMut(&mut Map<String, Value>, &str, &str),
{
    match value {
        Value::Object(map) => {
            let own = map
                .get(SCHEMA_ID_FIELD)
                .and_then(Value::as_str)
                .map(str::to_string);
            let effective = own.as_deref().or(inherited);
            if let Some(schema_id) = effective {
                f(map, schema_id, path);
            }
            let effective = effective.map(str::to_string);
            for (key, v) in map.iter_mut() {
                let child_path = format!("{path}.{key}");
                visit_schema_nodes(v, effective.as_deref(), &child_path, f);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter_mut().enumerate() {
                let child_path = format!("{path}[{i}]");
                visit_schema_nodes(v, inherited, &child_path, f);
            }
        }
        _ => {}
    }
}

/// Visit every object node, with a path but no schema tracking.
fn visit_objects<F>(value: &mut Value, path: &str, f: &mut F)
where
    F: FnMut(&mut Map<String, Value>, &str),
{
    match value {
        Value::Object(map) => {
            f(map, path);
            for (key, v) in map.iter_mut() {
                let child_path = format!("{path}.{key}");
                visit_objects(v, &child_path, f);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter_mut().enumerate() {
                let child_path = format!("{path}[{i}]");
                visit_objects(v, &child_path, f);
            }
        }
        _ => {}
    }
}

/// Visit every object node, no path bookkeeping.
fn visit_objects_untyped<F>(value: &mut Value, f: &mut F)
where
    F: FnMut(&mut Map<String, Value>),
{
    match value {
        Value::Object(map) => {
            f(map);
            for v in map.values_mut() {
                visit_objects_untyped(v, f);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                visit_objects_untyped(v, f);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{SchemaDef, SchemaFieldDef};
    use serde_json::json;

    fn field(name: &str, field_type: &str, ref_id: Option<&str>) -> SchemaFieldDef {
        SchemaFieldDef {
            field_id: 0,
            name: name.into(),
            field_type: field_type.into(),
            ref_id: ref_id.map(str::to_string),
            nested: None,
        }
    }

    fn catalog() -> Catalog {
        let schemas = vec![
            SchemaDef {
                id: "s-topic".into(),
                name: "topic".into(),
                schema_type: "Default".into(),
                fields: vec![
                    field("visible", "Boolean", None),
                    field("thumbnail", "Assets", None),
                    field("module", "References", Some("s-module")),
                    SchemaFieldDef {
                        nested: Some(vec![field("activity", "References", Some("s-activity"))]),
                        ..field("activities", "Array", None)
                    },
                ],
            },
            SchemaDef {
                id: "s-module".into(),
                name: "module".into(),
                schema_type: "Default".into(),
                fields: vec![],
            },
            SchemaDef {
                id: "s-activity".into(),
                name: "activity".into(),
                schema_type: "Default".into(),
                fields: vec![field("done", "Boolean", None)],
            },
        ];
        build_catalog(schemas)
    }

    // Classification is private to schema.rs; go through the public loader.
    fn build_catalog(schemas: Vec<SchemaDef>) -> Catalog {
        use crate::contract::MockContentSource;
        use crate::schema::SchemaCatalog;
        let mut source = MockContentSource::new();
        source
            .expect_fetch_schemas()
            .returning(move |_| Ok(schemas.clone()));
        let mut loader = SchemaCatalog::new();
        futures::executor::block_on(loader.load(&source, "app")).unwrap();
        loader.cached("app").unwrap().clone()
    }

    fn asset(id: &str, file_name: &str, asset_type: &str) -> AssetRecord {
        AssetRecord {
            id: id.into(),
            file_name: file_name.into(),
            slug: None,
            asset_type: asset_type.into(),
            version: 1,
            links: json!({ "content": format!("https://cdn/assets/{id}") }),
            referenced: false,
        }
    }

    #[test]
    fn locale_wrappers_collapse_everywhere() {
        let mut graph = EntityGraph::new();
        graph.insert(
            "topic".into(),
            json!([{ "data": { "title": { "iv": "Bones" }, "tags": { "iv": ["a", "b"] } } }]),
        );
        unwrap_locale_graph(&mut graph);
        assert_eq!(
            graph["topic"],
            json!([{ "data": { "title": "Bones", "tags": ["a", "b"] } }])
        );
    }

    #[test]
    fn unreferenced_assets_are_pruned() {
        let catalog = catalog();
        let mut graph = EntityGraph::new();
        graph.insert(
            "topic".into(),
            json!([
                { "id": "t1", "schemaId": "s-topic", "thumbnail": ["a1"] },
                { "id": "t2", "schemaId": "s-topic", "thumbnail": null }
            ]),
        );
        let mut assets = vec![
            asset("a1", "skull.png", "Image"),
            asset("a2", "unused.png", "Image"),
            asset("a3", "unused.mp3", "Audio"),
        ];
        let pipeline = Pipeline::new(&catalog, PruneConfig::default());
        let mut report = TransformReport::default();
        pipeline.resolve_assets(&mut graph, &mut assets, &mut report);

        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].id, "a1");
        assert!(assets[0].referenced);
        assert_eq!(report.pruned_assets, 2);
        // Field rewritten to the asset's file name; null collapsed to "".
        assert_eq!(graph["topic"][0]["thumbnail"], "skull.png");
        assert_eq!(graph["topic"][1]["thumbnail"], "");
    }

    #[test]
    fn missing_asset_is_a_discrepancy_not_an_error() {
        let catalog = catalog();
        let mut graph = EntityGraph::new();
        graph.insert(
            "topic".into(),
            json!([{ "id": "t1", "schemaId": "s-topic", "thumbnail": ["ghost"] }]),
        );
        let mut assets = vec![];
        let pipeline = Pipeline::new(&catalog, PruneConfig::default());
        let mut report = TransformReport::default();
        pipeline.resolve_assets(&mut graph, &mut assets, &mut report);
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(graph["topic"][0]["thumbnail"], "ghost");
    }

    #[test]
    fn guid_minting_and_reference_remap_are_bijective() {
        let catalog = catalog();
        let mut graph = EntityGraph::new();
        graph.insert(
            "module".into(),
            json!([
                { "id": "m1", "schemaId": "s-module" },
                { "id": "m2", "schemaId": "s-module" }
            ]),
        );
        graph.insert(
            "topic".into(),
            json!([
                { "id": "t1", "schemaId": "s-topic", "module": ["m1"] },
                { "id": "t2", "schemaId": "s-topic", "module": ["m1"] },
                { "id": "t3", "schemaId": "s-topic", "module": "m2" }
            ]),
        );

        let minted = mint_guids(&mut graph);
        assert_eq!(minted, 5);
        let index = build_ref_index(&graph);
        let mut report = TransformReport::default();
        remap_references(&mut graph, &catalog, &index, &mut report);

        let m1_guid = graph["module"][0]["guid"].as_str().unwrap();
        let m2_guid = graph["module"][1]["guid"].as_str().unwrap();
        // Every occurrence of m1's id was rewritten to the same guid.
        assert_eq!(graph["topic"][0]["module"], json!([m1_guid]));
        assert_eq!(graph["topic"][1]["module"], json!([m1_guid]));
        assert_eq!(graph["topic"][2]["module"], json!(m2_guid));
        assert_eq!(report.remapped_references, 3);
        assert!(report.discrepancies.is_empty());

        // Minting is at-most-once: a second pass mints nothing.
        assert_eq!(mint_guids(&mut graph), 0);
    }

    #[test]
    fn unresolvable_reference_keeps_the_original_id() {
        let catalog = catalog();
        let mut graph = EntityGraph::new();
        graph.insert("module".into(), json!([]));
        graph.insert(
            "topic".into(),
            json!([{ "id": "t1", "schemaId": "s-topic", "module": ["ghost"] }]),
        );
        mint_guids(&mut graph);
        let index = build_ref_index(&graph);
        let mut report = TransformReport::default();
        remap_references(&mut graph, &catalog, &index, &mut report);
        assert_eq!(graph["topic"][0]["module"], json!(["ghost"]));
        assert_eq!(report.discrepancies.len(), 1);
    }

    #[test]
    fn boolean_normalization_is_idempotent() {
        let catalog = catalog();
        let mut graph = EntityGraph::new();
        graph.insert(
            "topic".into(),
            json!([
                { "schemaId": "s-topic", "visible": null },
                { "schemaId": "s-topic", "visible": true },
                { "schemaId": "s-topic" },
                { "schemaId": "s-topic", "visible": "yes" }
            ]),
        );
        let pipeline = Pipeline::new(&catalog, PruneConfig::default());
        pipeline.normalize_booleans(&mut graph);
        let once = graph.clone();
        pipeline.normalize_booleans(&mut graph);
        assert_eq!(graph, once);

        assert_eq!(graph["topic"][0]["visible"], false);
        assert_eq!(graph["topic"][1]["visible"], true);
        assert_eq!(graph["topic"][2]["visible"], false);
        assert_eq!(graph["topic"][3]["visible"], true);
    }

    #[test]
    fn nested_schema_id_supersedes_the_inherited_one() {
        let catalog = catalog();
        let mut graph = EntityGraph::new();
        // The nested activity node carries its own schemaId; its `done`
        // boolean must be normalized against s-activity, not s-topic.
        graph.insert(
            "topic".into(),
            json!([{
                "schemaId": "s-topic",
                "visible": true,
                "embedded": { "schemaId": "s-activity", "done": null }
            }]),
        );
        let pipeline = Pipeline::new(&catalog, PruneConfig::default());
        pipeline.normalize_booleans(&mut graph);
        assert_eq!(graph["topic"][0]["embedded"]["done"], false);
    }

    #[test]
    fn display_name_denormalization_attaches_type_name() {
        let catalog = catalog();
        let mut graph = EntityGraph::new();
        graph.insert(
            "topic".into(),
            json!([{
                "schemaId": "s-topic",
                "pagesAndActivities": [
                    { "schemaId": "s-activity", "title": "Quiz" },
                    { "schemaId": "s-ghost", "title": "Unknown" }
                ]
            }]),
        );
        let pipeline = Pipeline::new(&catalog, PruneConfig::default());
        let mut report = TransformReport::default();
        pipeline.denormalize_type_names(&mut graph, &mut report);
        assert_eq!(graph["topic"][0]["pagesAndActivities"][0]["typeName"], "activity");
        assert!(graph["topic"][0]["pagesAndActivities"][1]
            .get("typeName")
            .is_none());
        assert_eq!(report.discrepancies.len(), 1);
    }

    #[test]
    fn link_lists_flatten_to_target_ids() {
        let mut graph = EntityGraph::new();
        graph.insert(
            "page".into(),
            json!([{
                "linkedResources": [
                    { "link": ["r1"] },
                    { "link": ["r2"] },
                    "r3"
                ]
            }]),
        );
        flatten_link_lists(&mut graph);
        assert_eq!(graph["page"][0]["linkedResources"], json!(["r1", "r2", "r3"]));
    }

    #[test]
    fn empty_pruning_honors_configuration() {
        let mut graph = EntityGraph::new();
        graph.insert(
            "topic".into(),
            json!([{ "a": null, "b": "", "c": [], "d": "keep", "nested": { "x": null } }]),
        );
        let mut defaults = graph.clone();
        prune_empties_graph(&mut defaults, &PruneConfig::default());
        assert_eq!(
            defaults["topic"][0],
            json!({ "b": "", "c": [], "d": "keep", "nested": {} })
        );

        let mut aggressive = graph.clone();
        prune_empties_graph(
            &mut aggressive,
            &PruneConfig {
                drop_null: true,
                drop_empty_string: true,
                drop_empty_array: true,
            },
        );
        assert_eq!(aggressive["topic"][0], json!({ "d": "keep", "nested": {} }));
    }

    #[test]
    fn full_pipeline_runs_every_pass_in_order() {
        let catalog = catalog();
        let mut graph = EntityGraph::new();
        graph.insert(
            "module".into(),
            json!([{ "id": "m1", "schemaId": "s-module" }]),
        );
        graph.insert(
            "topic".into(),
            json!([{
                "id": "t1",
                "schemaId": "s-topic",
                "title": { "iv": "Bones" },
                "visible": { "iv": null },
                "thumbnail": { "iv": ["a1"] },
                "module": { "iv": ["m1"] },
                "empty": null
            }]),
        );
        let mut assets = vec![asset("a1", "skull.png", "Image")];
        let pipeline = Pipeline::new(&catalog, PruneConfig::default());
        let report = pipeline.run(&mut graph, &mut assets);

        let topic = &graph["topic"][0];
        assert_eq!(topic["title"], "Bones");
        assert_eq!(topic["visible"], false);
        assert_eq!(topic["thumbnail"], "skull.png");
        assert_eq!(topic["module"], json!([graph["module"][0]["guid"]]));
        assert!(topic.get("empty").is_none());
        assert_eq!(assets.len(), 1);
        assert!(report.discrepancies.is_empty());
    }
}
