//! Schema Catalog: the source's type graph, cached per namespace, with the
//! O(1) lookup tables every later stage is driven by.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info};

use crate::contract::{ContentSource, SchemaDef};
use crate::error::Result;

/// Field kinds the transformation passes care about.
pub const FIELD_TYPE_ASSETS: &str = "Assets";
pub const FIELD_TYPE_BOOLEAN: &str = "Boolean";
pub const FIELD_TYPE_REFERENCES: &str = "References";
pub const FIELD_TYPE_ARRAY: &str = "Array";

/// Fully classified type graph for one `(namespace, version)`.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// schemaId → raw schema description.
    pub schemas_by_id: HashMap<String, SchemaDef>,
    /// schemaId → human-readable schema name.
    pub name_by_id: HashMap<String, String>,
    /// schemaId → field names carrying asset references.
    pub asset_fields: HashMap<String, BTreeSet<String>>,
    /// schemaId → field names that are booleans (directly or as the first
    /// nested element of an array field).
    pub boolean_fields: HashMap<String, BTreeSet<String>>,
    /// schemaId → field name → referenced schema name.
    pub reference_fields: HashMap<String, BTreeMap<String, String>>,
}

impl Catalog {
    pub fn schema_name(&self, schema_id: &str) -> Option<&str> {
        self.name_by_id.get(schema_id).map(String::as_str)
    }

    pub fn asset_fields_of(&self, schema_id: &str) -> Option<&BTreeSet<String>> {
        self.asset_fields.get(schema_id)
    }

    pub fn boolean_fields_of(&self, schema_id: &str) -> Option<&BTreeSet<String>> {
        self.boolean_fields.get(schema_id)
    }

    pub fn reference_fields_of(&self, schema_id: &str) -> Option<&BTreeMap<String, String>> {
        self.reference_fields.get(schema_id)
    }

    fn build(schemas: Vec<SchemaDef>) -> Self {
        let mut catalog = Catalog::default();
        for schema in &schemas {
            catalog
                .name_by_id
                .insert(schema.id.clone(), schema.name.clone());
        }
        for schema in schemas {
            let mut assets = BTreeSet::new();
            let mut booleans = BTreeSet::new();
            let mut references = BTreeMap::new();
            for field in &schema.fields {
                match field.field_type.as_str() {
                    FIELD_TYPE_ASSETS => {
                        assets.insert(field.name.clone());
                    }
                    FIELD_TYPE_BOOLEAN => {
                        booleans.insert(field.name.clone());
                    }
                    FIELD_TYPE_REFERENCES => {
                        if let Some(target) = catalog.resolve_target(field.ref_id.as_deref()) {
                            references.insert(field.name.clone(), target);
                        }
                    }
                    FIELD_TYPE_ARRAY => {
                        // Only the first nested References/Boolean element
                        // type of an array field is honored.
                        let nested = field
                            .nested
                            .as_deref()
                            .unwrap_or(&[])
                            .iter()
                            .find(|n| {
                                n.field_type == FIELD_TYPE_REFERENCES
                                    || n.field_type == FIELD_TYPE_BOOLEAN
                            });
                        match nested {
                            Some(n) if n.field_type == FIELD_TYPE_BOOLEAN => {
                                booleans.insert(field.name.clone());
                            }
                            Some(n) => {
                                if let Some(target) = catalog.resolve_target(n.ref_id.as_deref()) {
                                    references.insert(field.name.clone(), target);
                                }
                            }
                            None => {}
                        }
                    }
                    _ => {}
                }
            }
            debug!(
                schema = %schema.name,
                assets = assets.len(),
                booleans = booleans.len(),
                references = references.len(),
                "Classified schema fields"
            );
            if !assets.is_empty() {
                catalog.asset_fields.insert(schema.id.clone(), assets);
            }
            if !booleans.is_empty() {
                catalog.boolean_fields.insert(schema.id.clone(), booleans);
            }
            if !references.is_empty() {
                catalog
                    .reference_fields
                    .insert(schema.id.clone(), references);
            }
            catalog.schemas_by_id.insert(schema.id.clone(), schema);
        }
        catalog
    }

    fn resolve_target(&self, ref_id: Option<&str>) -> Option<String> {
        let id = ref_id?;
        // Prefer the schema name; fall back to the raw id when the target
        // schema is not part of this namespace's graph.
        Some(
            self.name_by_id
                .get(id)
                .cloned()
                .unwrap_or_else(|| id.to_string()),
        )
    }
}

/// Caching loader for [`Catalog`], keyed by namespace.
///
/// A `load` with a different namespace than the cached one discards the cache
/// and refetches; a repeated `load` for the same namespace is free.
#[derive(Default)]
pub struct SchemaCatalog {
    cached_namespace: Option<String>,
    catalog: Option<Catalog>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(
        &mut self,
        source: &dyn ContentSource,
        namespace: &str,
    ) -> Result<&Catalog> {
        let hit = self.cached_namespace.as_deref() == Some(namespace) && self.catalog.is_some();
        if !hit {
            info!(namespace, "Loading schema catalog from source");
            let schemas = source.fetch_schemas(namespace).await?;
            let catalog = Catalog::build(schemas);
            info!(
                namespace,
                schemas = catalog.schemas_by_id.len(),
                "Schema catalog built"
            );
            self.cached_namespace = Some(namespace.to_string());
            self.catalog = Some(catalog);
        }
        Ok(self.catalog.as_ref().unwrap_or_else(|| unreachable!()))
    }

    /// The cached catalog, if `load` already succeeded for this namespace.
    pub fn cached(&self, namespace: &str) -> Option<&Catalog> {
        if self.cached_namespace.as_deref() == Some(namespace) {
            self.catalog.as_ref()
        } else {
            None
        }
    }
}
