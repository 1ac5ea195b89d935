//! Group correlated entries into investigations.
//!
//! Entries sharing a group id are merged into one invocation: one store,
//! one output document. Groups keep the order in which they first appear,
//! and members keep their input order.
//!
//! ```text
//! GROUP_ID,ENTRY_ID          groups
//! G_1,1abc          →        G_1  [1abc, 2xyz]
//! G_2,4klm          →        G_2  [4klm]
//! G_1,2xyz          →        3def [3def]
//! ,3def
//! ```

use std::collections::HashMap;

use crate::input::{EntrySource, ManifestEntry};

/// Entries forming one investigation.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryGroup<T> {
    pub group_id: String,
    pub members: Vec<T>,
}

/// Group items by key, groups in first-seen order.
pub fn group_by_key<T, F>(items: Vec<T>, key: F) -> Vec<EntryGroup<T>>
where
    F: Fn(&T) -> &str,
{
    let mut groups: Vec<EntryGroup<T>> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for item in items {
        let group_id = key(&item).to_string();
        match positions.get(&group_id) {
            Some(position) => groups[*position].members.push(item),
            None => {
                positions.insert(group_id.clone(), groups.len());
                groups.push(EntryGroup {
                    group_id,
                    members: vec![item],
                });
            }
        }
    }

    groups
}

/// Group manifest lines; each group lists its entry ids.
pub fn group_manifest(entries: Vec<ManifestEntry>) -> Vec<EntryGroup<String>> {
    group_by_key(entries, ManifestEntry::group_key)
        .into_iter()
        .map(|group| EntryGroup {
            group_id: group.group_id,
            members: group.members.into_iter().map(|e| e.entry_id).collect(),
        })
        .collect()
}

/// Group already loaded entries by their `group_id`.
pub fn group_entries(entries: Vec<EntrySource>) -> Vec<EntryGroup<EntrySource>> {
    group_by_key(entries, EntrySource::group_key)
}
