use std::collections::BTreeSet;

use h5gate_spec::{QualifiedId, Registry, SpecSource};
use proptest::prelude::*;
use serde_json::{json, Map, Value as Json};

/// One `<P{i}>/` parent per entry: a private member set plus a `shared`
/// dataset that every parent declares. `<Child>/` merges the parents in
/// `order`.
fn registry_for(member_counts: &[usize], order: &[usize]) -> Registry {
    let mut schema = Map::new();
    for (i, count) in member_counts.iter().enumerate() {
        let mut node = Map::new();
        for m in 0..*count {
            node.insert(format!("p{i}_m{m}"), json!({}));
        }
        node.insert("shared".to_string(), json!({"description": format!("P{i}")}));
        schema.insert(format!("<P{i}>/"), Json::Object(node));
    }
    let merge: Vec<String> = order.iter().map(|i| format!("<P{i}>/")).collect();
    schema.insert("<Child>/".to_string(), json!({"merge": merge}));
    let doc = json!({"info": {"name": "core", "version": "1"}, "schema": schema});
    Registry::load(&[SpecSource::new("core.json", doc.to_string())], None)
        .expect("generated schema loads")
}

fn parents_and_order() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    prop::collection::vec(0usize..4, 1..6).prop_flat_map(|counts| {
        let order: Vec<usize> = (0..counts.len()).collect();
        (Just(counts), Just(order).prop_shuffle())
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn disjoint_members_do_not_depend_on_merge_order((counts, order) in parents_and_order()) {
        let registry = registry_for(&counts, &order);
        let child = registry
            .effective_type(&QualifiedId::new("core", "<Child>/"))
            .unwrap();
        let got: BTreeSet<String> = child.members().keys().cloned().collect();
        let mut want: BTreeSet<String> = counts
            .iter()
            .enumerate()
            .flat_map(|(i, c)| (0..*c).map(move |m| format!("p{i}_m{m}")))
            .collect();
        want.insert("shared".to_string());
        prop_assert_eq!(got, want);
    }

    #[test]
    fn last_merge_parent_wins_shared_member((counts, order) in parents_and_order()) {
        let registry = registry_for(&counts, &order);
        let child = registry
            .effective_type(&QualifiedId::new("core", "<Child>/"))
            .unwrap();
        let last = order[order.len() - 1];
        let expected = format!("P{last}");
        prop_assert_eq!(
            child.member("shared").and_then(|m| m.description.as_deref()),
            Some(expected.as_str())
        );
        prop_assert_eq!(child.ancestry.len(), counts.len() + 1);
    }
}
