//! Black-box round trip: `ApplyPatch` → `Get` → `History`.

use compliance_oracle::store::{PatchProvenance, RulesetStore};
use serde_json::{json, Value};

#[test]
fn apply_patch_then_get_reflects_new_value_and_history_shows_it() {
    let dir = tempfile::tempdir().unwrap();
    let store = RulesetStore::new(dir.path());

    let version = store
        .apply_patch(
            "US",
            "accredited_investor.income.individual_income",
            json!(250_000),
            PatchProvenance {
                change_id: "chg_roundtrip".to_string(),
                old_value: Value::Null,
                source: "integration-test".to_string(),
                summary: "raise individual income threshold".to_string(),
            },
        )
        .unwrap();

    let ruleset = store.get("US").unwrap();
    assert_eq!(ruleset.version, version);
    assert_eq!(
        RulesetStore::read_path(&ruleset, "accredited_investor.income.individual_income"),
        Some(&json!(250_000))
    );

    let last_entry = ruleset.changelog.last().unwrap();
    assert_eq!(last_entry.change_id, "chg_roundtrip");
    assert_eq!(last_entry.new_value, json!(250_000));
}

#[test]
fn two_sequential_patches_on_same_jurisdiction_both_land() {
    let dir = tempfile::tempdir().unwrap();
    let store = RulesetStore::new(dir.path());

    store
        .apply_patch(
            "SG",
            "accredited_investor.net_worth",
            json!(2_000_000),
            PatchProvenance {
                change_id: "chg_1".to_string(),
                old_value: Value::Null,
                source: "integration-test".to_string(),
                summary: "first".to_string(),
            },
        )
        .unwrap();
    store
        .apply_patch(
            "SG",
            "transfer_restrictions.holding_period.minimum_days",
            json!(180),
            PatchProvenance {
                change_id: "chg_2".to_string(),
                old_value: Value::Null,
                source: "integration-test".to_string(),
                summary: "second".to_string(),
            },
        )
        .unwrap();

    let ruleset = store.get("SG").unwrap();
    assert_eq!(ruleset.changelog.len(), 2);
    assert_eq!(
        RulesetStore::read_path(&ruleset, "accredited_investor.net_worth"),
        Some(&json!(2_000_000))
    );
    assert_eq!(
        RulesetStore::read_path(&ruleset, "transfer_restrictions.holding_period.minimum_days"),
        Some(&json!(180))
    );
}
