use shelf_common::action::ErrorType;
use shelf_common::change::{ChangeKind, ChangeRecord};

fn load_contract() -> serde_json::Value {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../contracts/queue-records.json");
    let content = std::fs::read_to_string(path).expect("contract file should be readable");
    serde_json::from_str(&content).expect("contract file should be valid JSON")
}

#[test]
fn persisted_records_decode_and_re_encode_unchanged() {
    let contract = load_contract();
    let records = contract["records"].as_array().expect("records should be an array");

    for raw in records {
        let record: ChangeRecord =
            serde_json::from_value(raw.clone()).expect("contract record should decode");
        let encoded = serde_json::to_value(&record).expect("record should encode");
        assert_eq!(&encoded, raw, "record should keep its persisted shape");

        let kind = raw["kind"].as_str().expect("kind should be a string");
        assert_eq!(ChangeKind::parse(kind), Some(record.kind()));
    }
}

#[test]
fn contract_covers_every_record_kind() {
    let contract = load_contract();
    let mut kinds: Vec<&str> = contract["records"]
        .as_array()
        .expect("records should be an array")
        .iter()
        .map(|raw| raw["kind"].as_str().expect("kind should be a string"))
        .collect();
    kinds.sort_unstable();
    kinds.dedup();
    assert_eq!(kinds.len(), 7);
}

#[test]
fn error_types_are_listed_from_least_to_most_severe() {
    let contract = load_contract();
    let names: Vec<ErrorType> = contract["error_types"]
        .as_array()
        .expect("error_types should be an array")
        .iter()
        .map(|v| serde_json::from_value(v.clone()).expect("error type should decode"))
        .collect();

    assert_eq!(names.len(), 9);
    for pair in names.windows(2) {
        assert!(pair[0].severity() < pair[1].severity(), "{} should rank below {}", pair[0], pair[1]);
    }
}
