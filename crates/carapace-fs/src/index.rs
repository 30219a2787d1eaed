//! Rotated log-segment selection.
//!
//! Log files are named `<task>.<log_type>.<N>` with `N` a non-negative
//! decimal index; higher indexes are newer. [`find_closest`] resolves a
//! desired `(index, offset)` pair to a concrete segment and an offset
//! inside it, walking only the segments actually present.

use carapace_proto::{AllocFileInfo, LogKind};

use crate::error::{FsError, Result};

/// One rotated segment: its parsed index and directory entry.
#[derive(Debug, Clone)]
pub(crate) struct IndexTuple {
    pub idx: i64,
    pub entry: AllocFileInfo,
}

/// Parses a directory listing into the ordered segment set for
/// `(task, log_type)`.
///
/// Directories and non-matching names are skipped. A name that matches
/// the prefix but whose suffix is not a non-negative integer is a hard
/// error: the layout is corrupt and silently skipping it could stream
/// the wrong bytes.
pub(crate) fn log_indexes(
    entries: &[AllocFileInfo],
    task: &str,
    log_type: LogKind,
) -> Result<Vec<IndexTuple>> {
    let prefix = format!("{task}.{log_type}.");
    let mut tuples = Vec::new();
    for entry in entries {
        if entry.is_dir {
            continue;
        }
        let Some(suffix) = entry.name.strip_prefix(&prefix) else {
            continue;
        };

        let idx = suffix
            .parse::<u64>()
            .ok()
            .and_then(|idx| i64::try_from(idx).ok())
            .ok_or_else(|| FsError::InvalidLogIndex(entry.name.clone()))?;

        tuples.push(IndexTuple {
            idx,
            entry: entry.clone(),
        });
    }
    Ok(tuples)
}

/// Resolves `(desired_idx, desired_offset)` against the present
/// segments.
///
/// The segment with the smallest index `≥ desired_idx` is chosen (the
/// newest one if none qualifies), then the offset walk moves backward or
/// forward across present segments until it lands inside one, clamping
/// at the first or last segment.
///
/// The returned offset always satisfies `0 ≤ offset ≤ size(entry)`.
pub(crate) fn find_closest(
    entries: &[AllocFileInfo],
    desired_idx: i64,
    desired_offset: i64,
    task: &str,
    log_type: LogKind,
) -> Result<(AllocFileInfo, i64, i64)> {
    let mut tuples = log_indexes(entries, task, log_type)?;
    if tuples.is_empty() {
        return Err(FsError::LogEntryNotFound {
            task: task.to_string(),
            log_type: log_type.to_string(),
        });
    }

    tuples.sort_by_key(|t| t.idx);
    let mut i = tuples.partition_point(|t| t.idx < desired_idx);
    if i == tuples.len() {
        i -= 1;
    }

    let mut offset = desired_offset;
    loop {
        let size = tuples[i].entry.size;
        if offset == 0 {
            break;
        }
        if offset < 0 {
            // Walking backward from the end.
            let adjusted = size + offset;
            if adjusted >= 0 {
                offset = adjusted;
                break;
            } else if i == 0 {
                offset = 0;
                break;
            }
            offset = adjusted;
            i -= 1;
        } else {
            // Walking forward from the start.
            if offset <= size {
                break;
            } else if i == tuples.len() - 1 {
                offset = size;
                break;
            }
            offset -= size;
            i += 1;
        }
    }

    let chosen = tuples.swap_remove(i);
    Ok((chosen.entry, chosen.idx, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(name: &str, size: i64) -> AllocFileInfo {
        AllocFileInfo {
            name: name.to_string(),
            is_dir: false,
            size,
            file_mode: String::new(),
            mod_time: Utc::now(),
        }
    }

    fn dir(name: &str) -> AllocFileInfo {
        AllocFileInfo {
            name: name.to_string(),
            is_dir: true,
            size: 0,
            file_mode: String::new(),
            mod_time: Utc::now(),
        }
    }

    #[test]
    fn log_indexes_filters_and_parses() {
        let entries = vec![
            entry("web.stdout.0", 10),
            entry("web.stdout.3", 30),
            entry("web.stderr.1", 99),
            entry("db.stdout.1", 99),
            entry("unrelated.txt", 99),
            dir("web.stdout.2"),
        ];

        let tuples = log_indexes(&entries, "web", LogKind::Stdout).unwrap();
        let idxs: Vec<i64> = tuples.iter().map(|t| t.idx).collect();
        assert_eq!(idxs, vec![0, 3]);
    }

    #[test]
    fn log_indexes_rejects_corrupt_suffix() {
        let entries = vec![entry("web.stdout.0", 10), entry("web.stdout.x", 5)];
        let err = log_indexes(&entries, "web", LogKind::Stdout).unwrap_err();
        assert!(matches!(err, FsError::InvalidLogIndex(name) if name == "web.stdout.x"));
    }

    #[test]
    fn log_indexes_rejects_negative_suffix() {
        let entries = vec![entry("web.stdout.-1", 10)];
        assert!(log_indexes(&entries, "web", LogKind::Stdout).is_err());
    }

    #[test]
    fn find_closest_empty_set_is_an_error() {
        let entries = vec![entry("db.stdout.0", 10)];
        let err = find_closest(&entries, 0, 0, "web", LogKind::Stdout).unwrap_err();
        assert!(matches!(err, FsError::LogEntryNotFound { .. }));
    }

    #[test]
    fn find_closest_picks_smallest_index_at_or_above() {
        let entries = vec![
            entry("web.stdout.0", 10),
            entry("web.stdout.2", 20),
            entry("web.stdout.5", 30),
        ];

        let (_, idx, off) = find_closest(&entries, 1, 0, "web", LogKind::Stdout).unwrap();
        assert_eq!((idx, off), (2, 0));

        let (_, idx, _) = find_closest(&entries, 5, 0, "web", LogKind::Stdout).unwrap();
        assert_eq!(idx, 5);
    }

    #[test]
    fn find_closest_clamps_to_last_when_index_too_high() {
        let entries = vec![entry("web.stdout.0", 10), entry("web.stdout.4", 20)];
        let (e, idx, off) = find_closest(&entries, i64::MAX, 0, "web", LogKind::Stdout).unwrap();
        assert_eq!(e.name, "web.stdout.4");
        assert_eq!((idx, off), (4, 0));
    }

    #[test]
    fn find_closest_walks_forward_across_segments() {
        let entries = vec![
            entry("web.stdout.0", 100),
            entry("web.stdout.1", 50),
            entry("web.stdout.2", 25),
        ];

        // 100 bytes land exactly at the end of segment 0.
        let (_, idx, off) = find_closest(&entries, 0, 100, "web", LogKind::Stdout).unwrap();
        assert_eq!((idx, off), (0, 100));

        // 120 bytes reach 20 into segment 1.
        let (_, idx, off) = find_closest(&entries, 0, 120, "web", LogKind::Stdout).unwrap();
        assert_eq!((idx, off), (1, 20));

        // Beyond all data clamps to the end of the last segment.
        let (_, idx, off) = find_closest(&entries, 0, 10_000, "web", LogKind::Stdout).unwrap();
        assert_eq!((idx, off), (2, 25));
    }

    #[test]
    fn find_closest_walks_backward_across_gaps() {
        // Index 1 is absent; the walk only uses present segments.
        let entries = vec![entry("web.stdout.0", 100), entry("web.stdout.2", 50)];

        let (e, idx, off) = find_closest(&entries, i64::MAX, -80, "web", LogKind::Stdout).unwrap();
        assert_eq!(e.name, "web.stdout.0");
        assert_eq!((idx, off), (0, 70));
    }

    #[test]
    fn find_closest_clamps_backward_walk_to_first_segment() {
        let entries = vec![entry("web.stdout.0", 100), entry("web.stdout.1", 50)];

        let (e, idx, off) =
            find_closest(&entries, i64::MAX, -1_000, "web", LogKind::Stdout).unwrap();
        assert_eq!(e.name, "web.stdout.0");
        assert_eq!((idx, off), (0, 0));
    }

    #[test]
    fn find_closest_offset_stays_within_entry() {
        let entries = vec![
            entry("web.stdout.0", 17),
            entry("web.stdout.1", 0),
            entry("web.stdout.2", 93),
        ];

        for desired_idx in [0, 1, 2, 7] {
            for desired_offset in [-500, -93, -1, 0, 1, 17, 110, 500] {
                let (e, _, off) =
                    find_closest(&entries, desired_idx, desired_offset, "web", LogKind::Stdout)
                        .unwrap();
                assert!(off >= 0, "offset {off} below zero");
                assert!(off <= e.size, "offset {off} beyond {}", e.size);
            }
        }
    }
}
