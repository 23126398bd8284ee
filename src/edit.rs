//! Bulk edit: locate sub-trees of a freshly fetched entity subset with a
//! wildcard path and a select rule, optionally mutate them with an edit
//! rule, and write changed records back through the source's patch call.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::contract::{ContentSource, PageQuery};
use crate::error::{EngineError, Result};
use crate::fetch::fetch_all_entities;
use crate::path::{apply_edit, parse_path, restore, select, Segment};
use crate::rule::{EditRule, RuleLog, SelectRule};

/// An operator-supplied bulk-edit request. When `edit_rule` is given without
/// an `edit_path`, the select path is re-used for the edit walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkEditSpec {
    pub select_path: String,
    pub select_rule: String,
    #[serde(default)]
    pub edit_path: Option<String>,
    #[serde(default)]
    pub edit_rule: Option<String>,
}

/// Everything parsed up front, before any data is touched, so a malformed
/// path or rule aborts with no partial commit.
struct ParsedSpec {
    select_path: Vec<Segment>,
    select_rule: SelectRule,
    edit: Option<(Vec<Segment>, EditRule)>,
    entity_type: String,
}

fn parse_spec(spec: &BulkEditSpec) -> Result<ParsedSpec> {
    let select_path = parse_path(&spec.select_path)?;
    let select_rule = SelectRule::parse(&spec.select_rule)?;
    let edit = match &spec.edit_rule {
        Some(rule_text) => {
            let path_text = spec.edit_path.as_deref().unwrap_or(&spec.select_path);
            Some((parse_path(path_text)?, EditRule::parse(rule_text)?))
        }
        None => None,
    };
    let entity_type = select_path
        .first()
        .map(|s| match s {
            Segment::Name(n) | Segment::Indexed(n, _) | Segment::Wildcard(n) => n.clone(),
        })
        .ok_or_else(|| EngineError::MalformedPath("empty select path".into()))?;
    Ok(ParsedSpec {
        select_path,
        select_rule,
        edit,
        entity_type,
    })
}

/// Run one bulk edit against a namespace and return the plain-text log.
pub async fn run_bulk_edit(
    source: &dyn ContentSource,
    namespace: &str,
    spec: &BulkEditSpec,
) -> Result<String> {
    let parsed = parse_spec(spec)?;
    info!(
        namespace,
        entity_type = %parsed.entity_type,
        select_path = %spec.select_path,
        "Starting bulk edit"
    );

    let records = fetch_all_entities(source, namespace, &parsed.entity_type, None, None).await?;
    let originals = records.clone();
    let mut graph = Map::new();
    graph.insert(parsed.entity_type.clone(), Value::Array(records));
    let graph = Value::Object(graph);

    let mut log = RuleLog::new();
    let Some(mut filtered) = select(&graph, &parsed.select_path, &parsed.select_rule, &mut log)?
    else {
        log.log("no nodes matched the select rule");
        return Ok(log.into_text());
    };
    let matched = filtered.kept[parsed.entity_type.as_str()]
        .as_array()
        .map(Vec::len)
        .unwrap_or(0);
    log.log(format!(
        "selected {matched} record(s), set aside {} branch(es)",
        filtered.set_aside_count()
    ));

    if let Some((edit_path, edit_rule)) = &parsed.edit {
        apply_edit(&mut filtered, edit_path, edit_rule, &mut log)?;
    }
    let restored = restore(filtered);

    // Patch back only the records the edit actually changed.
    let restored_records = restored[parsed.entity_type.as_str()]
        .as_array()
        .cloned()
        .unwrap_or_default();
    let mut patched = 0;
    for (original, updated) in originals.iter().zip(restored_records.iter()) {
        if original == updated {
            continue;
        }
        let Some(id) = updated.get("id").and_then(Value::as_str) else {
            warn!("Changed record without an id, cannot patch");
            log.log("warning: changed record without an id was not patched");
            continue;
        };
        let body = changed_fields(original, updated);
        source
            .patch_entity(namespace, &parsed.entity_type, id, &body)
            .await?;
        patched += 1;
        log.log(format!("patched {}/{id}", parsed.entity_type));
    }
    log.log(format!("done: {patched} record(s) patched"));
    Ok(log.into_text())
}

/// Partial patch body: only the top-level fields that differ.
fn changed_fields(original: &Value, updated: &Value) -> Value {
    let (Some(original), Some(updated)) = (original.as_object(), updated.as_object()) else {
        return updated.clone();
    };
    let mut body = Map::new();
    for (key, value) in updated {
        if original.get(key) != Some(value) {
            body.insert(key.clone(), value.clone());
        }
    }
    for key in original.keys() {
        if !updated.contains_key(key) {
            body.insert(key.clone(), Value::Null);
        }
    }
    Value::Object(body)
}

/// One named rule of a scheduled run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledRule {
    pub name: String,
    #[serde(flatten)]
    pub spec: BulkEditSpec,
}

/// Outcome of a multi-rule scheduled run.
#[derive(Debug)]
pub struct ScheduledRunReport {
    pub succeeded: usize,
    pub failed: usize,
    pub log: String,
}

/// Run every rule in order. One rule's failure is recorded and counted, and
/// the loop continues with the next rule.
pub async fn run_scheduled_rules(
    source: &dyn ContentSource,
    namespace: &str,
    rules: &[ScheduledRule],
) -> ScheduledRunReport {
    let mut lines = Vec::new();
    let mut succeeded = 0;
    let mut failed = 0;
    for rule in rules {
        info!(rule = %rule.name, "Running scheduled rule");
        match run_bulk_edit(source, namespace, &rule.spec).await {
            Ok(log) => {
                succeeded += 1;
                lines.push(format!("[{}] ok", rule.name));
                if !log.is_empty() {
                    lines.push(log);
                }
            }
            Err(e) => {
                failed += 1;
                let rendered = e.render();
                error!(rule = %rule.name, error = %e, "Scheduled rule failed");
                lines.push(format!(
                    "[{}] failed: {} ({}, id {})",
                    rule.name, rendered.message, rendered.code, rendered.id
                ));
            }
        }
    }
    ScheduledRunReport {
        succeeded,
        failed,
        log: lines.join("\n"),
    }
}

/// Per-entity-type counts of records modified after `since`.
pub async fn check_unpublished(
    source: &dyn ContentSource,
    namespace: &str,
    entity_types: &[String],
    since: DateTime<Utc>,
) -> Result<BTreeMap<String, u64>> {
    let mut counts = BTreeMap::new();
    for entity_type in entity_types {
        let query = PageQuery {
            skip: 0,
            take: 1,
            filter: Some(format!("lastModified gt {}", since.to_rfc3339())),
            sort: None,
        };
        let page = source.fetch_page(namespace, entity_type, &query).await?;
        counts.insert(entity_type.clone(), page.total);
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MockContentSource, Page};
    use serde_json::json;

    fn topic_fixture() -> Vec<Value> {
        vec![
            json!({ "id": "t1", "parts": ["Skull", "Rib"] }),
            json!({ "id": "t2", "parts": ["Leg", "Arm"] }),
            json!({ "id": "t3", "parts": ["Heart"] }),
        ]
    }

    fn source_returning(records: Vec<Value>) -> MockContentSource {
        let mut source = MockContentSource::new();
        let total = records.len() as u64;
        source
            .expect_fetch_page()
            .returning(move |_, _, _| Ok(Page { total, items: records.clone() }));
        source
    }

    #[tokio::test]
    async fn malformed_path_aborts_before_any_fetch() {
        // The mock has no expectations: touching it would panic.
        let source = MockContentSource::new();
        let spec = BulkEditSpec {
            select_path: "topic[x].parts".into(),
            select_rule: "true".into(),
            edit_path: None,
            edit_rule: None,
        };
        let err = run_bulk_edit(&source, "app", &spec).await.unwrap_err();
        assert!(matches!(err, EngineError::MalformedPath(_)));
    }

    #[tokio::test]
    async fn select_only_run_patches_nothing() {
        let mut source = source_returning(topic_fixture());
        source.expect_patch_entity().times(0);
        let spec = BulkEditSpec {
            select_path: "topic[*].parts[*]".into(),
            select_rule: "return $node === 'Leg'".into(),
            edit_path: None,
            edit_rule: None,
        };
        let log = run_bulk_edit(&source, "app", &spec).await.unwrap();
        assert!(log.contains("selected 1 record(s)"));
        assert!(log.contains("0 record(s) patched"));
    }

    #[tokio::test]
    async fn edit_run_patches_only_changed_records() {
        let mut source = source_returning(topic_fixture());
        source
            .expect_patch_entity()
            .times(1)
            .withf(|_, entity_type, id, body| {
                entity_type == "topic"
                    && id == "t2"
                    && body == &json!({ "parts": ["Leg (left)", "Arm"] })
            })
            .returning(|_, _, _, _| Ok(()));
        let spec = BulkEditSpec {
            select_path: "topic[*].parts[*]".into(),
            select_rule: "return $node === 'Leg'".into(),
            edit_path: None,
            edit_rule: Some("$node = 'Leg (left)'".into()),
        };
        let log = run_bulk_edit(&source, "app", &spec).await.unwrap();
        assert!(log.contains("patched topic/t2"));
        assert!(log.contains("1 record(s) patched"));
    }

    #[tokio::test]
    async fn no_match_returns_a_log_without_patching() {
        let source = source_returning(topic_fixture());
        let spec = BulkEditSpec {
            select_path: "topic[*].parts[*]".into(),
            select_rule: "return $node === 'Femur'".into(),
            edit_path: None,
            edit_rule: Some("$node = 'x'".into()),
        };
        let log = run_bulk_edit(&source, "app", &spec).await.unwrap();
        assert!(log.contains("no nodes matched"));
    }

    #[tokio::test]
    async fn scheduled_run_isolates_rule_failures() {
        let mut source = MockContentSource::new();
        source.expect_fetch_page().returning(|_, _, _| {
            Ok(Page {
                total: 1,
                items: vec![json!({ "id": "t1", "parts": ["Leg"] })],
            })
        });
        let rules = vec![
            ScheduledRule {
                name: "bad-path".into(),
                spec: BulkEditSpec {
                    select_path: "topic[oops]".into(),
                    select_rule: "true".into(),
                    edit_path: None,
                    edit_rule: None,
                },
            },
            ScheduledRule {
                name: "good".into(),
                spec: BulkEditSpec {
                    select_path: "topic[*].parts[*]".into(),
                    select_rule: "return $node === 'Leg'".into(),
                    edit_path: None,
                    edit_rule: None,
                },
            },
        ];
        let report = run_scheduled_rules(&source, "app", &rules).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert!(report.log.contains("[bad-path] failed"));
        assert!(report.log.contains("[good] ok"));
    }

    #[tokio::test]
    async fn unpublished_counts_come_from_the_filtered_total() {
        let mut source = MockContentSource::new();
        source
            .expect_fetch_page()
            .times(2)
            .returning(|_, entity_type, query| {
                assert!(query
                    .filter
                    .as_deref()
                    .unwrap()
                    .starts_with("lastModified gt "));
                let total = if entity_type == "topic" { 7 } else { 0 };
                Ok(Page { total, items: vec![] })
            });
        let since = Utc::now();
        let counts = check_unpublished(
            &source,
            "app",
            &["topic".to_string(), "course".to_string()],
            since,
        )
        .await
        .unwrap();
        assert_eq!(counts["topic"], 7);
        assert_eq!(counts["course"], 0);
    }
}
