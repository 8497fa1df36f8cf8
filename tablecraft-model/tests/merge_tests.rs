use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tablecraft_model::{MergePolicy, merge};
use tablecraft_types::{AttributeValue, Item, Patch, PatchValue};

fn item(pairs: Vec<(&str, AttributeValue)>) -> Item {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn existing() -> Item {
    item(vec![
        ("name", "Widget".into()),
        ("price", 10.into()),
        ("color", AttributeValue::Null),
        ("tags", AttributeValue::L(vec!["a".into(), "b".into()])),
        (
            "address",
            AttributeValue::M(item(vec![("city", "Oslo".into()), ("zip", "0150".into())])),
        ),
    ])
}

// ── Clear ────────────────────────────────────────────────────────

#[test]
fn clear_overrides_updates_win() {
    let result = merge(&item(vec![("price", 10.into())]), &Patch::new().clear("price"), MergePolicy::UpdatesWin);
    assert_eq!(result, item(vec![("price", AttributeValue::Null)]));
}

#[test]
fn clear_overrides_existing_wins() {
    let result = merge(&existing(), &Patch::new().clear("name"), MergePolicy::ExistingWins);
    assert_eq!(result.get("name"), Some(&AttributeValue::Null));
}

#[test]
fn clear_in_nested_map() {
    let patch = Patch::new().nested("address", Patch::new().clear("zip"));
    let result = merge(&existing(), &patch, MergePolicy::NonNullWins);
    let address = result.get("address").and_then(AttributeValue::as_m).unwrap();
    assert_eq!(address.get("zip"), Some(&AttributeValue::Null));
    assert_eq!(address.get("city"), Some(&AttributeValue::from("Oslo")));
}

// ── Policies ─────────────────────────────────────────────────────

#[test]
fn non_null_wins_ignores_null() {
    let patch = Patch::new().null("name").set("price", 12);
    let result = merge(&existing(), &patch, MergePolicy::NonNullWins);
    assert_eq!(result.get("name"), Some(&AttributeValue::from("Widget")));
    assert_eq!(result.get("price"), Some(&AttributeValue::from(12)));
}

#[test]
fn non_null_wins_does_not_add_null() {
    let result = merge(&existing(), &Patch::new().null("extra"), MergePolicy::NonNullWins);
    assert!(!result.contains_key("extra"));
}

#[test]
fn updates_win_writes_null() {
    let result = merge(&existing(), &Patch::new().null("name"), MergePolicy::UpdatesWin);
    assert_eq!(result.get("name"), Some(&AttributeValue::Null));
}

#[test]
fn existing_wins_only_fills_absent() {
    let patch = Patch::new().set("name", "Gadget").set("stock", 4);
    let result = merge(&existing(), &patch, MergePolicy::ExistingWins);
    assert_eq!(result.get("name"), Some(&AttributeValue::from("Widget")));
    assert_eq!(result.get("stock"), Some(&AttributeValue::from(4)));
}

#[test]
fn existing_null_counts_as_present() {
    let result = merge(&existing(), &Patch::new().set("color", "red"), MergePolicy::ExistingWins);
    assert_eq!(result.get("color"), Some(&AttributeValue::Null));
}

// ── Structure ────────────────────────────────────────────────────

#[test]
fn nested_maps_merge_field_by_field() {
    let patch = Patch::new().nested("address", Patch::new().set("city", "Bergen").set("country", "NO"));
    let result = merge(&existing(), &patch, MergePolicy::UpdatesWin);
    assert_eq!(
        result.get("address"),
        Some(&AttributeValue::M(item(vec![
            ("city", "Bergen".into()),
            ("country", "NO".into()),
            ("zip", "0150".into()),
        ])))
    );
}

#[test]
fn map_value_in_set_also_merges() {
    let incoming = item(vec![("address", AttributeValue::M(item(vec![("city", "Bergen".into())])))]);
    let result = merge(&existing(), &Patch::from_item(incoming), MergePolicy::UpdatesWin);
    let address = result.get("address").and_then(AttributeValue::as_m).unwrap();
    assert_eq!(address.get("zip"), Some(&AttributeValue::from("0150")));

    let mut direct = Patch::new();
    direct.insert(
        "address",
        PatchValue::Set(AttributeValue::M(item(vec![("city", "Bergen".into())]))),
    );
    assert_eq!(merge(&existing(), &direct, MergePolicy::UpdatesWin), result);
}

#[test]
fn lists_are_replaced_wholesale() {
    let patch = Patch::new().set("tags", AttributeValue::L(vec!["c".into()]));
    let result = merge(&existing(), &patch, MergePolicy::NonNullWins);
    assert_eq!(result.get("tags"), Some(&AttributeValue::L(vec!["c".into()])));
}

#[test]
fn map_replaces_scalar() {
    let patch = Patch::new().nested("name", Patch::new().set("first", "Ada"));
    let result = merge(&existing(), &patch, MergePolicy::UpdatesWin);
    assert_eq!(
        result.get("name"),
        Some(&AttributeValue::M(item(vec![("first", "Ada".into())])))
    );
}

#[test]
fn inputs_are_not_mutated() {
    let before = existing();
    let patch = Patch::new().set("price", 99).clear("name");
    let patch_copy = patch.clone();
    let _ = merge(&before, &patch, MergePolicy::UpdatesWin);
    assert_eq!(before, existing());
    assert_eq!(patch, patch_copy);
}

// ── Properties ───────────────────────────────────────────────────

fn leaf() -> impl Strategy<Value = AttributeValue> {
    prop_oneof![
        "[a-z]{0,4}".prop_map(AttributeValue::S),
        any::<i32>().prop_map(AttributeValue::from),
        any::<bool>().prop_map(AttributeValue::Bool),
        Just(AttributeValue::Null),
    ]
}

fn value() -> impl Strategy<Value = AttributeValue> {
    leaf().prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(AttributeValue::L),
            prop::collection::btree_map("[a-c]", inner, 0..3).prop_map(AttributeValue::M),
        ]
    })
}

fn item_strategy() -> impl Strategy<Value = Item> {
    prop::collection::btree_map("[a-e]", value(), 0..5)
}

fn patch_strategy() -> impl Strategy<Value = Patch> {
    (item_strategy(), prop::collection::vec("[a-e]", 0..2)).prop_map(|(item, cleared)| {
        cleared
            .into_iter()
            .fold(Patch::from_item(item), |patch, name| patch.clear(name))
    })
}

fn policy() -> impl Strategy<Value = MergePolicy> {
    prop_oneof![
        Just(MergePolicy::NonNullWins),
        Just(MergePolicy::UpdatesWin),
        Just(MergePolicy::ExistingWins),
    ]
}

proptest! {
    #[test]
    fn existing_wins_is_idempotent(existing in item_strategy(), incoming in patch_strategy()) {
        let once = merge(&existing, &incoming, MergePolicy::ExistingWins);
        let twice = merge(&once, &incoming, MergePolicy::ExistingWins);
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn every_policy_is_idempotent(existing in item_strategy(), incoming in patch_strategy(), policy in policy()) {
        let once = merge(&existing, &incoming, policy);
        let twice = merge(&once, &incoming, policy);
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn untouched_attributes_survive(existing in item_strategy(), incoming in patch_strategy(), policy in policy()) {
        let result = merge(&existing, &incoming, policy);
        for (name, value) in &existing {
            if incoming.get(name).is_none() {
                prop_assert_eq!(result.get(name), Some(value));
            }
        }
    }
}
