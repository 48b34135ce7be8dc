use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
    hash::Hash,
};

/// State that lives only on the client and must survive a refetch
pub trait Transient {
    /// Copy the local-only state of `previous` (the same entity, as it was
    /// before the refetch) onto `self` (the fresh server version)
    fn carry_transient_from(&mut self, previous: &Self);
}

/// Merges a freshly fetched list into the current one.
///
/// The server is trusted for set membership, order and content: the result
/// holds exactly the items of `incoming`, in `incoming` order. The client is
/// trusted for transient state, which gets carried over from the item of
/// `existing` with the same key. Duplicate keys in `incoming` are collapsed,
/// keeping the first occurrence.
pub fn merge_list<T, K, F>(existing: &[T], incoming: Vec<T>, key_fn: F) -> Vec<T>
where
    T: Transient,
    K: Debug + Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut previous = HashMap::with_capacity(existing.len());
    for item in existing {
        previous.entry(key_fn(item)).or_insert(item);
    }

    let mut seen = HashSet::with_capacity(incoming.len());
    let mut res = Vec::with_capacity(incoming.len());
    for mut item in incoming {
        let key = key_fn(&item);
        if seen.contains(&key) {
            tracing::warn!(?key, "dropping duplicate item from fetched list");
            continue;
        }
        if let Some(prev) = previous.get(&key) {
            item.carry_transient_from(prev);
        }
        seen.insert(key);
        res.push(item);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Eq, PartialEq)]
    struct Item {
        id: u8,
        content: u8,
        open: bool,
    }

    impl Transient for Item {
        fn carry_transient_from(&mut self, previous: &Item) {
            self.open = previous.open;
        }
    }

    fn item(id: u8, content: u8, open: bool) -> Item {
        Item { id, content, open }
    }

    #[test]
    fn server_wins_for_content_client_for_flags() {
        let existing = vec![item(1, 10, true), item(2, 20, false), item(3, 30, true)];
        let incoming = vec![item(3, 31, false), item(1, 11, false), item(4, 40, false)];
        assert_eq!(
            merge_list(&existing, incoming, |i| i.id),
            vec![item(3, 31, true), item(1, 11, true), item(4, 40, false)],
        );
    }

    #[test]
    fn duplicate_incoming_keys_are_collapsed() {
        let incoming = vec![item(1, 10, false), item(2, 20, false), item(1, 99, false)];
        assert_eq!(
            merge_list(&[], incoming, |i| i.id),
            vec![item(1, 10, false), item(2, 20, false)],
        );
    }

    #[test]
    fn fuzz_merge_is_idempotent_and_deduplicated() {
        bolero::check!()
            .with_type::<(Vec<(u8, u8, bool)>, Vec<(u8, u8)>)>()
            .cloned()
            .for_each(|(existing, incoming)| {
                // small key space, so that keys actually collide
                let existing = existing
                    .into_iter()
                    .map(|(id, content, open)| item(id % 8, content, open))
                    .collect::<Vec<_>>();
                let incoming = incoming
                    .into_iter()
                    .map(|(id, content)| item(id % 8, content, false))
                    .collect::<Vec<_>>();

                let once = merge_list(&existing, incoming.clone(), |i| i.id);
                let again = merge_list(&existing, incoming.clone(), |i| i.id);
                assert_eq!(once, again);
                assert_eq!(merge_list(&once, incoming.clone(), |i| i.id), once);

                let ids = once.iter().map(|i| i.id).collect::<HashSet<_>>();
                assert_eq!(ids.len(), once.len(), "duplicate ids in {once:?}");
                let incoming_ids = incoming.iter().map(|i| i.id).collect::<HashSet<_>>();
                assert_eq!(ids, incoming_ids);
            });
    }
}
