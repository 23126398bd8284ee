//! Bulk-edit runs over a realistic locale-wrapped entity shape: deep
//! wildcard paths, rule-driven selection, and patch bodies that prove the
//! filtered branches were restored losslessly.

use serde_json::{json, Value};

use course_porter::contract::{MockContentSource, Page};
use course_porter::edit::{run_bulk_edit, BulkEditSpec};
use course_porter::error::EngineError;

const DEEP_PATH: &str =
    "topic[*].data.sections.iv[*].pagesAndActivities[*].answerChoices[*].text";

fn choice(text: &str) -> Value {
    json!({ "text": text })
}

fn topics() -> Vec<Value> {
    vec![
        json!({
            "id": "t1",
            "data": { "sections": { "iv": [
                { "title": "Bones", "pagesAndActivities": [
                    { "answerChoices": [choice("Skull"), choice("Rib")] }
                ] }
            ] } }
        }),
        json!({
            "id": "t2",
            "data": { "sections": { "iv": [
                { "title": "Limbs", "pagesAndActivities": [
                    { "answerChoices": [choice("Leg"), choice("Arm")] }
                ] },
                { "title": "Organs", "pagesAndActivities": [
                    { "answerChoices": [choice("Heart")] }
                ] }
            ] } }
        }),
        json!({
            "id": "t3",
            "data": { "sections": { "iv": [] } }
        }),
    ]
}

fn source_with_topics() -> MockContentSource {
    let mut source = MockContentSource::new();
    let records = topics();
    let total = records.len() as u64;
    source.expect_fetch_page().returning(move |_, entity_type, _| {
        assert_eq!(entity_type, "topic");
        Ok(Page {
            total,
            items: records.clone(),
        })
    });
    source
}

#[tokio::test]
async fn deep_edit_patches_one_record_with_siblings_restored() {
    let mut source = source_with_topics();
    source
        .expect_patch_entity()
        .times(1)
        .withf(|_, entity_type, id, body| {
            entity_type == "topic"
                && id == "t2"
                // The whole data tree comes back: the edited leaf plus every
                // sibling the selection had set aside.
                && body
                    == &json!({
                        "data": { "sections": { "iv": [
                            { "title": "Limbs", "pagesAndActivities": [
                                { "answerChoices": [
                                    { "text": "Leg (left)" },
                                    { "text": "Arm" }
                                ] }
                            ] },
                            { "title": "Organs", "pagesAndActivities": [
                                { "answerChoices": [{ "text": "Heart" }] }
                            ] }
                        ] } }
                    })
        })
        .returning(|_, _, _, _| Ok(()));

    let spec = BulkEditSpec {
        select_path: DEEP_PATH.into(),
        select_rule: "return $node === 'Leg'".into(),
        edit_path: None,
        edit_rule: Some("$node = 'Leg (left)'".into()),
    };
    let log = run_bulk_edit(&source, "app", &spec).await.unwrap();
    assert!(log.contains("selected 1 record(s)"));
    assert!(log.contains("patched topic/t2"));
    assert!(log.contains("1 record(s) patched"));
}

#[tokio::test]
async fn edit_path_prefix_mutates_the_enclosing_object() {
    let mut source = source_with_topics();
    source
        .expect_patch_entity()
        .times(1)
        .withf(|_, _, id, body| {
            if id != "t2" {
                return false;
            }
            // Only the surviving choice gained the flag; its restored sibling
            // did not pass through the edit walk.
            let choices = &body["data"]["sections"]["iv"][0]["pagesAndActivities"][0]
                ["answerChoices"];
            choices[0] == json!({ "text": "Leg", "flagged": true })
                && choices[1] == json!({ "text": "Arm" })
        })
        .returning(|_, _, _, _| Ok(()));

    let spec = BulkEditSpec {
        select_path: DEEP_PATH.into(),
        select_rule: "return $node === 'Leg'".into(),
        edit_path: Some(
            "topic[*].data.sections.iv[*].pagesAndActivities[*].answerChoices[*]".into(),
        ),
        edit_rule: Some("$node.flagged = true".into()),
    };
    let log = run_bulk_edit(&source, "app", &spec).await.unwrap();
    assert!(log.contains("1 record(s) patched"));
}

#[tokio::test]
async fn builtin_predicates_work_over_the_deep_path() {
    let mut source = source_with_topics();
    source.expect_patch_entity().times(0);
    let spec = BulkEditSpec {
        select_path: DEEP_PATH.into(),
        select_rule: "return startsWith(lower($node), 'r')".into(),
        edit_path: None,
        edit_rule: None,
    };
    let log = run_bulk_edit(&source, "app", &spec).await.unwrap();
    // "Rib" matches on t1 only.
    assert!(log.contains("selected 1 record(s)"));
    assert!(log.contains("0 record(s) patched"));
}

#[tokio::test]
async fn failing_rule_reports_the_offending_path() {
    let source = source_with_topics();
    let spec = BulkEditSpec {
        select_path: DEEP_PATH.into(),
        // Ordering a string against a number fails at evaluation time.
        select_rule: "return $node < 3".into(),
        edit_path: None,
        edit_rule: None,
    };
    let err = run_bulk_edit(&source, "app", &spec).await.unwrap_err();
    match err {
        EngineError::RuleFailed { path, .. } => {
            assert!(path.starts_with("topic[0].data.sections.iv[0]"));
        }
        other => panic!("expected RuleFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_rule_aborts_before_any_fetch() {
    // No expectations on the mock: any call would panic the test.
    let source = MockContentSource::new();
    let spec = BulkEditSpec {
        select_path: DEEP_PATH.into(),
        select_rule: "return eval('1')".into(),
        edit_path: None,
        edit_rule: None,
    };
    let err = run_bulk_edit(&source, "app", &spec).await.unwrap_err();
    assert!(matches!(err, EngineError::MalformedRule(_)));
}
