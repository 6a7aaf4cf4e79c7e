//! Chunk diff: which source windows must be (re-)sent to the destination
//!
//! Both sequences must come from digest runs with the same window size.

use std::cmp::Ordering;

use crate::checksum::ChunkMeta;

fn sort_by_offset(metas: &mut Vec<ChunkMeta>) {
    if !metas.windows(2).all(|w| w[0].offset <= w[1].offset) {
        metas.sort_by_key(|m| m.offset);
    }
}

/// Return the windows of `src` whose content is absent from or differs in `dst`.
///
/// A single lock-step pass over both sequences. Destination windows at offsets
/// the source does not have are skipped, never reported, so a destination
/// longer than its source is left as is.
pub fn diff_chunk_meta(mut src: Vec<ChunkMeta>, mut dst: Vec<ChunkMeta>) -> Vec<ChunkMeta> {
    if src.is_empty() || dst.is_empty() {
        return src;
    }

    sort_by_offset(&mut src);
    sort_by_offset(&mut dst);

    let mut needed = Vec::with_capacity(src.len());
    let (mut i, mut j) = (0, 0);

    while i < src.len() && j < dst.len() {
        match src[i].offset.cmp(&dst[j].offset) {
            Ordering::Less => {
                needed.push(src[i].clone());
                i += 1;
            }
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                if src[i].checksum != dst[j].checksum {
                    needed.push(src[i].clone());
                }
                i += 1;
                j += 1;
            }
        }
    }

    // Source windows past the end of the destination
    needed.extend_from_slice(&src[i..]);
    needed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(offset: u64, checksum: &str, length: u64) -> ChunkMeta {
        ChunkMeta {
            offset,
            checksum: checksum.to_string(),
            length,
        }
    }

    fn seq(sums: &[&str], window: u64) -> Vec<ChunkMeta> {
        sums.iter()
            .enumerate()
            .map(|(i, s)| meta(i as u64 * window, s, window))
            .collect()
    }

    #[test]
    fn identical_sequences_need_nothing() {
        let m = seq(&["a", "b", "c"], 4);
        assert!(diff_chunk_meta(m.clone(), m).is_empty());
    }

    #[test]
    fn empty_side_returns_full_source() {
        let m = seq(&["a", "b"], 4);
        assert_eq!(diff_chunk_meta(m.clone(), Vec::new()), m);
        assert!(diff_chunk_meta(Vec::new(), m).is_empty());
    }

    #[test]
    fn changed_window_is_needed() {
        let src = seq(&["a", "X", "c"], 4);
        let dst = seq(&["a", "b", "c"], 4);
        assert_eq!(diff_chunk_meta(src, dst), vec![meta(4, "X", 4)]);
    }

    #[test]
    fn grown_source_sends_all_trailing_windows() {
        let src = seq(&["a", "b", "c", "d", "e"], 4);
        let dst = seq(&["a", "b"], 4);
        let needed = diff_chunk_meta(src, dst);
        assert_eq!(needed, vec![meta(8, "c", 4), meta(12, "d", 4), meta(16, "e", 4)]);
    }

    #[test]
    fn shrunk_source_leaves_destination_tail_alone() {
        // Destination-only windows are never reported; there is no truncation.
        let src = seq(&["a", "b"], 4);
        let dst = seq(&["a", "b", "c", "d"], 4);
        assert!(diff_chunk_meta(src, dst).is_empty());

        let src = seq(&["a", "Z"], 4);
        let dst = seq(&["a", "b", "c"], 4);
        assert_eq!(diff_chunk_meta(src, dst), vec![meta(4, "Z", 4)]);
    }

    #[test]
    fn short_last_window_with_same_offset_compares_checksum() {
        let mut src = seq(&["a", "b"], 4);
        src.push(meta(8, "tail-new", 2));
        let mut dst = seq(&["a", "b"], 4);
        dst.push(meta(8, "tail-old", 4));
        assert_eq!(diff_chunk_meta(src, dst), vec![meta(8, "tail-new", 2)]);
    }

    #[test]
    fn unsorted_inputs_are_sorted_first() {
        let src = vec![meta(8, "c", 4), meta(0, "a", 4), meta(4, "X", 4)];
        let dst = vec![meta(4, "b", 4), meta(8, "c", 4), meta(0, "a", 4)];
        assert_eq!(diff_chunk_meta(src, dst), vec![meta(4, "X", 4)]);
    }

    #[test]
    fn five_mib_file_with_changed_tail() {
        const MIB: u64 = 1024 * 1024;
        let src = vec![meta(0, "a", 2 * MIB), meta(2 * MIB, "b", 2 * MIB), meta(4 * MIB, "new", MIB)];
        let dst = vec![meta(0, "a", 2 * MIB), meta(2 * MIB, "b", 2 * MIB), meta(4 * MIB, "old", MIB)];
        assert_eq!(diff_chunk_meta(src, dst), vec![meta(4 * MIB, "new", MIB)]);
    }
}
