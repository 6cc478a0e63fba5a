use std::collections::HashSet;

use crate::models::Event;

/// Drops repeated uids, keeping the first occurrence in iteration order.
pub fn dedup(events: Vec<Event>) -> Vec<Event> {
    let mut seen = HashSet::with_capacity(events.len());
    events
        .into_iter()
        .filter(|event| seen.insert(event.uid.clone()))
        .collect()
}

/// Merges per-source lists into one collection unique by uid. Lists are taken
/// in source config order, so on a uid clash the earlier source's event wins.
pub fn combine<I>(lists: I) -> Vec<Event>
where
    I: IntoIterator<Item = Vec<Event>>,
{
    dedup(lists.into_iter().flatten().collect())
}
