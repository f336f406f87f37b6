//! Size-bounded batch planning for attachment transfer.

use tablesync_protocol::FileManifestEntry;

/// One planned transfer batch.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferBatch {
    /// Paths in this batch, in input order.
    pub relative_paths: Vec<String>,
    /// Sum of the batch's content lengths.
    pub total_bytes: u64,
}

/// Greedily packs files into batches no larger than `max_bytes`.
///
/// Input order is preserved. A single file larger than the ceiling gets a
/// batch of its own rather than being dropped: the ceiling bounds batch
/// *assembly*, it is not a per-file limit.
pub fn plan_batches(files: &[FileManifestEntry], max_bytes: u64) -> Vec<TransferBatch> {
    let mut batches = Vec::new();
    let mut current = TransferBatch {
        relative_paths: Vec::new(),
        total_bytes: 0,
    };

    for file in files {
        let would_overflow = !current.relative_paths.is_empty()
            && current.total_bytes + file.content_length > max_bytes;
        if would_overflow {
            batches.push(std::mem::replace(
                &mut current,
                TransferBatch {
                    relative_paths: Vec::new(),
                    total_bytes: 0,
                },
            ));
        }
        current.relative_paths.push(file.relative_path.clone());
        current.total_bytes += file.content_length;
    }

    if !current.relative_paths.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, len: u64) -> FileManifestEntry {
        FileManifestEntry::new(path, "sha256:x", len)
    }

    #[test]
    fn empty_input_plans_no_batches() {
        assert!(plan_batches(&[], 100).is_empty());
    }

    #[test]
    fn packs_under_ceiling_preserving_order() {
        let files = vec![entry("a", 40), entry("b", 40), entry("c", 40)];
        let batches = plan_batches(&files, 100);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].relative_paths, vec!["a", "b"]);
        assert_eq!(batches[0].total_bytes, 80);
        assert_eq!(batches[1].relative_paths, vec!["c"]);
    }

    #[test]
    fn exact_fit_stays_in_one_batch() {
        let files = vec![entry("a", 60), entry("b", 40)];
        let batches = plan_batches(&files, 100);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].total_bytes, 100);
    }

    #[test]
    fn oversize_file_gets_a_singleton_batch() {
        let files = vec![entry("small", 10), entry("huge", 500), entry("tail", 10)];
        let batches = plan_batches(&files, 100);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].relative_paths, vec!["huge"]);
        assert_eq!(batches[1].total_bytes, 500);
    }

    #[test]
    fn every_file_lands_in_exactly_one_batch() {
        let files: Vec<_> = (0u64..37)
            .map(|i| entry(&format!("f{i}"), (i % 9) * 13))
            .collect();
        let batches = plan_batches(&files, 64);
        let planned: usize = batches.iter().map(|b| b.relative_paths.len()).sum();
        assert_eq!(planned, files.len());
        for batch in &batches {
            assert!(batch.total_bytes <= 64 || batch.relative_paths.len() == 1);
        }
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn plan_preserves_order_and_respects_the_ceiling(
            sizes in prop::collection::vec(0u64..200, 0..40),
            max_bytes in 1u64..150,
        ) {
            let files: Vec<_> = sizes
                .iter()
                .enumerate()
                .map(|(i, len)| entry(&format!("f{i}"), *len))
                .collect();
            let batches = plan_batches(&files, max_bytes);

            let flattened: Vec<&str> = batches
                .iter()
                .flat_map(|b| b.relative_paths.iter().map(String::as_str))
                .collect();
            let original: Vec<&str> =
                files.iter().map(|f| f.relative_path.as_str()).collect();
            prop_assert_eq!(flattened, original);

            for batch in &batches {
                prop_assert!(
                    batch.total_bytes <= max_bytes || batch.relative_paths.len() == 1
                );
            }
        }
    }
}
