use std::io::Write;
use std::path::Path;
use std::time::Duration;

use medcontent_core::sync::PendingSync;
use medcontent_core::{CollectionName, Item, ItemId, Mutation, MutationOutcome};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::commands::common::{
    apply_assignments, format_item_lines, format_pending_lines, format_timestamp, load_defaults,
    load_pending, parse_assignment, parse_collection, pending_path_for, report_outcome,
    save_pending,
};
use crate::error::CliError;

fn pending_entry(id: &str) -> PendingSync {
    PendingSync {
        collection: CollectionName::from("offices"),
        item_id: ItemId::from(id),
        mutation: Mutation::Create(Item::new(id).with_field("name", "Kano Office")),
        attempts: 2,
        last_error: "Request timed out after 10s".to_string(),
        last_attempt_at: 0,
    }
}

#[test]
fn parse_assignment_prefers_json_values() {
    assert_eq!(
        parse_assignment("downloadCount=3").unwrap(),
        ("downloadCount".to_string(), json!(3))
    );
    assert_eq!(
        parse_assignment("active=true").unwrap(),
        ("active".to_string(), json!(true))
    );
    assert_eq!(
        parse_assignment("name=Kano Office").unwrap(),
        ("name".to_string(), Value::String("Kano Office".to_string()))
    );
    assert_eq!(
        parse_assignment("note=a=b").unwrap(),
        ("note".to_string(), Value::String("a=b".to_string()))
    );
}

#[test]
fn parse_assignment_rejects_missing_key_or_separator() {
    assert!(matches!(
        parse_assignment("name"),
        Err(CliError::InvalidAssignment(_))
    ));
    assert!(matches!(
        parse_assignment(" =value"),
        Err(CliError::InvalidAssignment(_))
    ));
}

#[test]
fn apply_assignments_refuses_reserved_fields() {
    let mut item = Item::new("office-1");
    apply_assignments(&mut item, &["name=Jos".to_string()]).unwrap();
    assert_eq!(item.name(), Some("Jos"));

    let result = apply_assignments(&mut item, &["updatedAt=5".to_string()]);
    assert!(matches!(result, Err(CliError::Core(_))));
    assert_eq!(item.updated_at, 0);
}

#[test]
fn parse_collection_trims_and_validates() {
    assert_eq!(
        parse_collection(" clinicalApps ").unwrap(),
        CollectionName::from("clinicalApps")
    );
    assert!(matches!(parse_collection("  "), Err(CliError::EmptyCollection)));
    assert!(parse_collection("../etc").is_err());
}

#[test]
fn pending_file_sits_next_to_snapshot() {
    assert_eq!(
        pending_path_for(Path::new("/data/medcontent/collections.json")),
        Path::new("/data/medcontent/pending.json")
    );
}

#[test]
fn pending_ledger_survives_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("pending.json");
    assert!(load_pending(&path).unwrap().is_empty());

    let entries = vec![pending_entry("office-5")];
    save_pending(&path, &entries).unwrap();
    assert_eq!(load_pending(&path).unwrap(), entries);

    save_pending(&path, &[]).unwrap();
    assert!(!path.exists());
    save_pending(&path, &[]).unwrap();
}

#[test]
fn corrupt_pending_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pending.json");
    std::fs::write(&path, "{not json").unwrap();
    assert!(matches!(load_pending(&path), Err(CliError::Serialization(_))));
}

#[test]
fn item_lines_show_id_time_and_name() {
    let items = vec![
        Item::new("office-1").with_field("name", "Lagos"),
        Item::new("office-2"),
    ];
    assert_eq!(
        format_item_lines(&items),
        vec![
            "office-1  1970-01-01 00:00:00  Lagos".to_string(),
            "office-2  1970-01-01 00:00:00  -".to_string(),
        ]
    );
}

#[test]
fn pending_lines_include_kind_and_error() {
    let lines = format_pending_lines(&[pending_entry("office-5")]);
    assert_eq!(
        lines,
        vec![
            "1970-01-01 00:00:00  create     offices/office-5  attempts=2  Request timed out after 10s"
                .to_string()
        ]
    );
}

#[test]
fn format_timestamp_renders_utc() {
    assert_eq!(format_timestamp(1_700_000_000_000), "2023-11-14 22:13:20");
}

#[test]
fn failed_outcome_becomes_not_persisted_error() {
    let outcome = MutationOutcome::Failed {
        error: format!("Request timed out after {:?}", Duration::from_secs(10)),
    };
    let error = report_outcome(outcome, "office-5").unwrap_err();
    assert!(error.to_string().contains("medcontent retry"));
}

#[test]
fn defaults_are_optional() {
    assert!(load_defaults(None).unwrap().is_empty());
    assert!(matches!(
        load_defaults(Some(Path::new("/nonexistent/defaults.json"))),
        Err(CliError::Core(_))
    ));
}

#[test]
fn defaults_load_from_collections_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"offices": [{{"id": "office-1", "name": "Lagos", "updatedAt": 1}}], "downloads": []}}"#
    )
    .unwrap();

    let defaults = load_defaults(Some(file.path())).unwrap();
    assert_eq!(defaults.len(), 2);
    assert_eq!(
        defaults[&CollectionName::from("offices")][0].name(),
        Some("Lagos")
    );
}
