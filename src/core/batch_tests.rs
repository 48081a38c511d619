//! Batch construction unit tests
//!
//! Covers line normalization, per-line format resolution, rejection
//! reporting and playlist hinting.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;

    use crate::core::batch::build_descriptors;
    use crate::core::models::MediaFormat;

    fn no_knowledge(_url: &str) -> Option<bool> {
        None
    }

    #[test]
    fn test_blank_and_whitespace_lines_are_skipped() {
        let lines = [
            "https://example.com/watch?v=a",
            "",
            "   ",
            "\t",
            "https://example.com/watch?v=b",
        ];
        let plan = build_descriptors(
            &lines,
            &HashMap::new(),
            MediaFormat::default(),
            Path::new("/downloads"),
            no_knowledge,
        );

        assert_eq!(plan.descriptors.len(), 2);
        assert!(plan.rejections.is_empty());
    }

    #[test]
    fn test_lines_are_trimmed_before_validation() {
        let lines = ["  https://example.com/watch?v=a  "];
        let plan = build_descriptors(
            &lines,
            &HashMap::new(),
            MediaFormat::default(),
            Path::new("/downloads"),
            no_knowledge,
        );

        assert_eq!(plan.descriptors.len(), 1);
        assert_eq!(plan.descriptors[0].url, "https://example.com/watch?v=a");
    }

    #[test]
    fn test_default_format_and_overrides() {
        let lines = [
            "https://example.com/watch?v=a",
            "https://example.com/watch?v=b",
        ];
        let mut overrides = HashMap::new();
        overrides.insert(1, MediaFormat::Mp3Best);

        let plan = build_descriptors(
            &lines,
            &overrides,
            MediaFormat::Mp4_720p,
            Path::new("/downloads"),
            no_knowledge,
        );

        assert_eq!(plan.descriptors[0].requested_format, MediaFormat::Mp4_720p);
        assert_eq!(plan.descriptors[1].requested_format, MediaFormat::Mp3Best);
    }

    #[test]
    fn test_override_indices_count_raw_lines() {
        // index 0 is the blank line, so the override at 2 must land on
        // the second URL
        let lines = ["", "https://example.com/watch?v=a", "https://example.com/watch?v=b"];
        let mut overrides = HashMap::new();
        overrides.insert(2, MediaFormat::Mp3Best);

        let plan = build_descriptors(
            &lines,
            &overrides,
            MediaFormat::default(),
            Path::new("/downloads"),
            no_knowledge,
        );

        assert_eq!(plan.descriptors.len(), 2);
        assert_eq!(plan.descriptors[0].requested_format, MediaFormat::default());
        assert_eq!(plan.descriptors[1].requested_format, MediaFormat::Mp3Best);
    }

    #[test]
    fn test_invalid_lines_are_rejected_with_position() {
        let lines = [
            "https://example.com/watch?v=a",
            "ftp://example.com/file",
            "just words",
            "https://example.com/watch?v=b",
        ];
        let plan = build_descriptors(
            &lines,
            &HashMap::new(),
            MediaFormat::default(),
            Path::new("/downloads"),
            no_knowledge,
        );

        assert_eq!(plan.descriptors.len(), 2);
        assert_eq!(plan.rejections.len(), 2);
        assert_eq!(plan.rejections[0].index, 1);
        assert_eq!(plan.rejections[1].index, 2);
        assert!(plan.rejections[1].reason.contains("not a valid http(s) URL"));
    }

    #[test]
    fn test_tracking_params_are_stripped() {
        let lines = ["https://youtu.be/abc?si=SHARETOKEN&t=42"];
        let plan = build_descriptors(
            &lines,
            &HashMap::new(),
            MediaFormat::default(),
            Path::new("/downloads"),
            no_knowledge,
        );

        let url = &plan.descriptors[0].url;
        assert!(!url.contains("si="));
        assert!(url.contains("t=42"));
    }

    #[test]
    fn test_duplicate_urls_get_distinct_descriptors() {
        let lines = [
            "https://example.com/watch?v=same",
            "https://example.com/watch?v=same",
        ];
        let plan = build_descriptors(
            &lines,
            &HashMap::new(),
            MediaFormat::default(),
            Path::new("/downloads"),
            no_knowledge,
        );

        assert_eq!(plan.descriptors.len(), 2);
        assert_ne!(plan.descriptors[0].id, plan.descriptors[1].id);
        assert_eq!(plan.descriptors[0].url, plan.descriptors[1].url);
    }

    #[test]
    fn test_playlist_hint_from_url_shape() {
        let lines = [
            "https://www.youtube.com/playlist?list=PL123",
            "https://example.com/watch?v=single",
        ];
        let plan = build_descriptors(
            &lines,
            &HashMap::new(),
            MediaFormat::default(),
            Path::new("/downloads"),
            no_knowledge,
        );

        assert!(plan.descriptors[0].wants_expansion());
        assert_eq!(plan.descriptors[1].playlist_hint, None);
        assert!(!plan.descriptors[1].wants_expansion());
    }

    #[test]
    fn test_probe_knowledge_beats_url_shape() {
        let lines = [
            "https://www.youtube.com/playlist?list=PL123",
            "https://vimeo.com/album/7",
        ];
        // a probe said the first is a single video and the second is a
        // playlist, whatever their URLs look like
        let knowledge = |url: &str| -> Option<bool> {
            if url.contains("list=PL123") {
                Some(false)
            } else if url.contains("album") {
                Some(true)
            } else {
                None
            }
        };
        let plan = build_descriptors(
            &lines,
            &HashMap::new(),
            MediaFormat::default(),
            Path::new("/downloads"),
            knowledge,
        );

        assert!(!plan.descriptors[0].wants_expansion());
        assert!(plan.descriptors[1].wants_expansion());
    }

    #[test]
    fn test_order_and_destination_are_preserved() {
        let lines = [
            "https://example.com/watch?v=first",
            "https://example.com/watch?v=second",
            "https://example.com/watch?v=third",
        ];
        let plan = build_descriptors(
            &lines,
            &HashMap::new(),
            MediaFormat::default(),
            Path::new("/media/batch"),
            no_knowledge,
        );

        let urls: Vec<&str> = plan.descriptors.iter().map(|d| d.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/watch?v=first",
                "https://example.com/watch?v=second",
                "https://example.com/watch?v=third",
            ]
        );
        for descriptor in &plan.descriptors {
            assert_eq!(descriptor.destination_dir, Path::new("/media/batch"));
            assert!(descriptor.parent_id.is_none());
        }
    }
}
