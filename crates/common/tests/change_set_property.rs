use std::collections::BTreeSet;

use proptest::prelude::*;
use shelf_common::change::{ArticleChangeType, ChangeSet};

fn change_type() -> impl Strategy<Value = ArticleChangeType> {
    prop_oneof![
        Just(ArticleChangeType::Archive),
        Just(ArticleChangeType::Favorite),
        Just(ArticleChangeType::Title),
        Just(ArticleChangeType::Tags),
    ]
}

proptest! {
    #[test]
    fn merging_single_changes_yields_their_union(changes in prop::collection::vec(change_type(), 0..32)) {
        let mut merged = ChangeSet::new();
        for change in &changes {
            merged.merge(&ChangeSet::single(*change));
        }

        let expected: BTreeSet<_> = changes.iter().copied().collect();
        prop_assert_eq!(merged.iter().collect::<BTreeSet<_>>(), expected);
    }

    #[test]
    fn merge_order_does_not_matter(
        left in prop::collection::vec(change_type(), 0..8),
        right in prop::collection::vec(change_type(), 0..8),
    ) {
        let left: ChangeSet = left.into_iter().collect();
        let right: ChangeSet = right.into_iter().collect();

        let mut a = left.clone();
        a.merge(&right);
        let mut b = right.clone();
        b.merge(&left);

        prop_assert_eq!(a, b);
    }
}
