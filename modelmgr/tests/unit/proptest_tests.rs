//! Property-based tests using proptest

use proptest::prelude::*;
use std::path::Path;

use modelmgr::common::protocol::{ClientAck, ClientFrame};
use modelmgr::config::StoragePaths;
use modelmgr::sync::file_select::{is_video_url, sanitize_filename};

// ---------------------------------------------------------------------------
// sanitize_filename
// ---------------------------------------------------------------------------

proptest! {
    /// 結果は常に1成分のファイル名
    #[test]
    fn sanitized_name_has_no_separators(name in ".{0,64}") {
        let sanitized = sanitize_filename(&name);
        prop_assert!(!sanitized.is_empty());
        prop_assert!(!sanitized.contains('/') && !sanitized.contains('\\'));
        prop_assert!(sanitized != "." && sanitized != "..");
    }

    /// 区切りを含まない名前はそのまま
    #[test]
    fn plain_names_are_kept(name in "[A-Za-z0-9_-]{1,32}\\.safetensors") {
        prop_assert_eq!(sanitize_filename(&name), name);
    }
}

// ---------------------------------------------------------------------------
// is_video_url
// ---------------------------------------------------------------------------

proptest! {
    /// 拡張子判定は大文字小文字とクエリに影響されない
    #[test]
    fn video_extension_ignores_case_and_query(
        stem in "[a-z0-9]{1,16}",
        query in "[a-z0-9=&]{0,16}",
    ) {
        let url = format!("https://cdn.example/{}.MP4?{}", stem, query);
        prop_assert!(is_video_url(&url));
        let image = format!("https://cdn.example/{}.png?{}", stem, query);
        prop_assert!(!is_video_url(&image));
    }
}

// ---------------------------------------------------------------------------
// ClientFrame::into_ack
// ---------------------------------------------------------------------------

proptest! {
    /// 正のIDの complete/deleted だけが状態遷移になる
    #[test]
    fn only_known_kinds_with_positive_id_become_acks(
        id in 0u64..1_000_000,
        kind in prop_oneof![
            Just("complete".to_string()),
            Just("deleted".to_string()),
            "[a-z]{0,10}",
        ],
    ) {
        let ack = ClientFrame { kind: kind.clone(), model_version_id: id }.into_ack();
        match (kind.as_str(), id) {
            (_, 0) => prop_assert_eq!(ack, None),
            ("complete", id) => prop_assert_eq!(ack, Some(ClientAck::Complete(id))),
            ("deleted", id) => prop_assert_eq!(ack, Some(ClientAck::Deleted(id))),
            _ => prop_assert_eq!(ack, None),
        }
    }
}

// ---------------------------------------------------------------------------
// StoragePaths::relative_to_models
// ---------------------------------------------------------------------------

proptest! {
    /// モデルルート配下のパスは `/` 区切りの相対パスになる
    #[test]
    fn paths_under_model_root_become_relative(
        segments in prop::collection::vec("[A-Za-z0-9_]{1,12}", 1..5),
    ) {
        let paths = StoragePaths::new("/srv/models", "/srv/images").unwrap();
        let mut full = paths.model_root.clone();
        for segment in &segments {
            full.push(segment);
        }
        prop_assert_eq!(paths.relative_to_models(&full), segments.join("/"));
        prop_assert_eq!(
            paths.relative_to_models(Path::new("/elsewhere/file.bin")),
            "/elsewhere/file.bin"
        );
    }
}
