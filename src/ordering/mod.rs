//! The export orderer: stable series/instance ordering with tie-breaks.
//!
//! The orderer is the only component permitted to decide export order; it
//! is forbidden from taking filesystem (ingest) order as a shortcut, which
//! is why `Entry` carries `source_index` as data to log against rather
//! than as something `order` is allowed to sort by.

use serde::{Deserialize, Serialize};

/// One instance (or frame) as seen by the orderer, carrying both its
/// ingest position (for the reorder log) and the keys it sorts by.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub source_index: usize,
    pub sop_instance_uid: String,
    pub instance_number: Option<i32>,
    pub frame_number: Option<i32>,
    pub acquisition_time: Option<String>,
}

/// The sort key precedence: primary `instance_number`, tie-break
/// `frame_number`, tie-break `acquisition_time`, last-resort lexical
/// `sop_instance_uid`. Missing keys sort after present ones at their tier
/// (an instance with no `InstanceNumber` should not silently sort first).
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord)]
struct SortKey {
    instance_number: (bool, i32),
    frame_number: (bool, i32),
    acquisition_time: (bool, String),
    sop_instance_uid: String,
}

fn sort_key(entry: &Entry) -> SortKey {
    SortKey {
        instance_number: (entry.instance_number.is_none(), entry.instance_number.unwrap_or(i32::MAX)),
        frame_number: (entry.frame_number.is_none(), entry.frame_number.unwrap_or(i32::MAX)),
        acquisition_time: (
            entry.acquisition_time.is_none(),
            entry.acquisition_time.clone().unwrap_or_default(),
        ),
        sop_instance_uid: entry.sop_instance_uid.clone(),
    }
}

/// One position in the ordered manifest, plus whether it moved relative
/// to ingest order (and by how much), for the reorder log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderedPosition {
    pub position: usize,
    pub entry: Entry,
    pub moved_from_source_index: bool,
}

/// A logged reorder: this entry's ingest position versus its assigned
/// export position, with the ordering method that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderLogEntry {
    pub sop_instance_uid: String,
    pub source_index: usize,
    pub export_position: usize,
    pub ordering_method: &'static str,
}

/// The full, immutable output of `order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOrder {
    pub positions: Vec<OrderedPosition>,
    pub reorder_log: Vec<ReorderLogEntry>,
}

const ORDERING_METHOD: &str = "instance_number,frame_number,acquisition_time,sop_instance_uid";

/// Compute the stable export order for one series' worth of entries.
/// Never consults `source_index` as a sort key — only to detect and log
/// reorders after the fact.
pub fn order(mut entries: Vec<Entry>) -> ExportOrder {
    // Stable sort: entries with identical keys keep their relative ingest
    // order, which keeps the "last-resort" tie-break meaningful rather
    // than arbitrary when even the UID ties (duplicate UIDs are rejected
    // upstream at ingest, so this only matters for pathological input).
    entries.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

    let mut positions = Vec::with_capacity(entries.len());
    let mut reorder_log = Vec::new();

    for (position, entry) in entries.into_iter().enumerate() {
        let moved = entry.source_index != position;
        if moved {
            reorder_log.push(ReorderLogEntry {
                sop_instance_uid: entry.sop_instance_uid.clone(),
                source_index: entry.source_index,
                export_position: position,
                ordering_method: ORDERING_METHOD,
            });
        }
        positions.push(OrderedPosition {
            position,
            entry,
            moved_from_source_index: moved,
        });
    }

    ExportOrder {
        positions,
        reorder_log,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source_index: usize, uid: &str, instance_number: Option<i32>) -> Entry {
        Entry {
            source_index,
            sop_instance_uid: uid.to_string(),
            instance_number,
            frame_number: None,
            acquisition_time: None,
        }
    }

    #[test]
    fn orders_primarily_by_instance_number() {
        let entries = vec![
            entry(0, "uid-3", Some(3)),
            entry(1, "uid-1", Some(1)),
            entry(2, "uid-2", Some(2)),
        ];
        let result = order(entries);
        let uids: Vec<_> = result
            .positions
            .iter()
            .map(|p| p.entry.sop_instance_uid.clone())
            .collect();
        assert_eq!(uids, vec!["uid-1", "uid-2", "uid-3"]);
    }

    #[test]
    fn ten_instance_series_with_one_excluded_leaves_no_gap_in_the_orderer_itself() {
        // The orderer only ever sees the instances handed to it; exclusion
        // gaps are the caller's concern (it logs the exclusion reason and
        // omits the entry before calling `order`). Here we assert that
        // omitting entry 5 of 10 just reorders the remaining nine by
        // instance_number, unaffected by the missing one.
        let entries: Vec<Entry> = (1..=10)
            .filter(|&n| n != 5)
            .enumerate()
            .map(|(i, n)| entry(i, &format!("uid-{n}"), Some(n)))
            .collect();
        let result = order(entries);
        assert_eq!(result.positions.len(), 9);
        let numbers: Vec<_> = result
            .positions
            .iter()
            .map(|p| p.entry.instance_number.unwrap())
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn frame_number_breaks_ties_on_equal_instance_number() {
        let entries = vec![
            Entry {
                source_index: 0,
                sop_instance_uid: "cine".into(),
                instance_number: Some(1),
                frame_number: Some(2),
                acquisition_time: None,
            },
            Entry {
                source_index: 1,
                sop_instance_uid: "cine".into(),
                instance_number: Some(1),
                frame_number: Some(1),
                acquisition_time: None,
            },
        ];
        let result = order(entries);
        assert_eq!(result.positions[0].entry.frame_number, Some(1));
        assert_eq!(result.positions[1].entry.frame_number, Some(2));
    }

    #[test]
    fn lexical_sop_uid_is_the_last_resort_tie_break() {
        let entries = vec![
            entry(0, "uid-b", None),
            entry(1, "uid-a", None),
        ];
        let result = order(entries);
        let uids: Vec<_> = result
            .positions
            .iter()
            .map(|p| p.entry.sop_instance_uid.clone())
            .collect();
        assert_eq!(uids, vec!["uid-a", "uid-b"]);
    }

    #[test]
    fn reorder_relative_to_ingest_is_logged() {
        let entries = vec![entry(0, "uid-2", Some(2)), entry(1, "uid-1", Some(1))];
        let result = order(entries);
        assert_eq!(result.reorder_log.len(), 2);
        assert!(result.reorder_log.iter().all(|r| r.ordering_method.contains("instance_number")));
    }
}
