use super::PileupEntry;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Collapse mates of one template seen at the same position to a single
/// observation.
///
/// Only paired records take part. The mate with the higher base quality
/// stays; on a tie the one that arrived first stays. Returns how many
/// entries were removed.
pub(crate) fn reconcile(column: &mut Vec<PileupEntry>) -> usize {
    let paired = column
        .iter()
        .filter(|entry| entry.record.flags.is_segmented())
        .count();
    if paired < 2 {
        return 0;
    }

    let mut removed = vec![false; column.len()];
    let mut count = 0;
    let mut kept: HashMap<&[u8], usize> = HashMap::with_capacity(paired);

    for (i, entry) in column.iter().enumerate() {
        if !entry.record.flags.is_segmented() || entry.record.name.is_empty() {
            continue;
        }

        match kept.entry(entry.record.name.as_slice()) {
            Entry::Occupied(mut slot) => {
                let j = *slot.get();
                if entry.quality() > column[j].quality() {
                    removed[j] = true;
                    slot.insert(i);
                } else {
                    removed[i] = true;
                }
                count += 1;
            }
            Entry::Vacant(slot) => {
                slot.insert(i);
            }
        }
    }

    if count > 0 {
        let mut i = 0;
        column.retain(|_| {
            let keep = !removed[i];
            i += 1;
            keep
        });
    }

    count
}
