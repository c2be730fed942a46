use archive_fs::StreamingChecksum;
use archive_fs::checksum::{compute_content_checksum, compute_file_checksum, parse_sidecar};
use proptest::prelude::*;
use std::fs;
use tempfile::TempDir;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn streaming_matches_one_shot_for_any_chunking(
        content in prop::collection::vec(any::<u8>(), 0..4096),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(content.len() + 1)).collect();
        offsets.sort_unstable();

        let mut streaming = StreamingChecksum::new();
        let mut start = 0;
        for end in offsets {
            streaming.update(&content[start..end]);
            start = end;
        }
        streaming.update(&content[start..]);

        prop_assert_eq!(streaming.bytes(), content.len() as u64);
        prop_assert_eq!(streaming.finalize(), compute_content_checksum(&content));
    }

    #[test]
    fn file_checksum_matches_content_checksum(
        content in prop::collection::vec(any::<u8>(), 0..8192),
    ) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("artifact.zim");
        fs::write(&path, &content).unwrap();

        prop_assert_eq!(
            compute_file_checksum(&path).unwrap(),
            compute_content_checksum(&content)
        );
    }

    #[test]
    fn sidecar_round_trips_digest(content in prop::collection::vec(any::<u8>(), 0..256)) {
        let checksum = compute_content_checksum(&content);
        let hex = checksum.trim_start_matches("sha256:");
        let sidecar = format!("{hex}  wikipedia_en_all_maxi_2025-01.zim\n");

        prop_assert_eq!(parse_sidecar(&sidecar), Some(checksum));
    }
}
