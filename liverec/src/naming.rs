//! Every filename, storage key, local path and public URL for a segment or a
//! live manifest is derived here from (camera id, filename) so that any of
//! them can be rebuilt later without extra state.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

pub const MANIFEST: &str = "index.m3u8";
pub const LIVE_SEGMENT_PATTERN: &str = "segment_%05d.ts";

const STAMP: &str = "%Y%m%d_%H%M%S";

/// Camera ids and filenames become path components and URL segments
pub fn is_safe_component(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 128
        && s != "."
        && s != ".."
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// `{camera}_{YYYYmmdd_HHMMSS}.{ext}`
pub fn segment_filename(camera_id: &str, start: DateTime<Utc>, extension: &str) -> String {
    segment_filename_seq(camera_id, start, 0, extension)
}

/// `{camera}_{YYYYmmdd_HHMMSS}_{seq}.{ext}` for a second segment started
/// within the same second; `seq = 0` is the plain name.
pub fn segment_filename_seq(
    camera_id: &str,
    start: DateTime<Utc>,
    seq: u32,
    extension: &str,
) -> String {
    if seq == 0 {
        format!("{}_{}.{}", camera_id, start.format(STAMP), extension)
    } else {
        format!("{}_{}_{}.{}", camera_id, start.format(STAMP), seq, extension)
    }
}

/// Start time encoded in a segment filename of `camera_id`
pub fn parse_segment_start(camera_id: &str, filename: &str) -> Option<DateTime<Utc>> {
    let rest = filename.strip_prefix(camera_id)?.strip_prefix('_')?;
    let (stamp, _ext) = rest.rsplit_once('.')?;
    // date and time are 8 and 6 digits, anything after is the sequence
    let (stamp, seq) = match stamp.get(15..) {
        Some(tail) if !tail.is_empty() => (&stamp[..15], tail.strip_prefix('_')?),
        _ => (stamp, "1"),
    };
    if seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, STAMP)
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn segment_dir(root: &Path, camera_id: &str) -> PathBuf {
    root.join(camera_id)
}

pub fn segment_path(root: &Path, camera_id: &str, filename: &str) -> PathBuf {
    segment_dir(root, camera_id).join(filename)
}

pub fn storage_key(camera_id: &str, filename: &str) -> String {
    storage::join_key(&[camera_id, filename])
}

pub fn stream_url(base_url: &str, camera_id: &str, filename: &str) -> String {
    format!(
        "{}{}",
        base_url.trim_end_matches('/'),
        api::path::segment_stream(camera_id, filename)
    )
}

pub fn download_url(base_url: &str, camera_id: &str, filename: &str) -> String {
    format!(
        "{}{}",
        base_url.trim_end_matches('/'),
        api::path::segment(camera_id, filename)
    )
}

pub fn stream_dir(root: &Path, camera_id: &str) -> PathBuf {
    root.join(camera_id)
}

pub fn manifest_path(root: &Path, camera_id: &str) -> PathBuf {
    stream_dir(root, camera_id).join(MANIFEST)
}

pub fn manifest_url(base_url: &str, camera_id: &str) -> String {
    format!(
        "{}{}",
        base_url.trim_end_matches('/'),
        api::path::hls(camera_id, MANIFEST)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BASE: &str = "http://nvr.local:8080/";

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 5).unwrap()
    }

    #[test]
    fn test_segment_filename() {
        let name = segment_filename("cam01", start(), "mp4");
        assert_eq!(name, "cam01_20240115_120005.mp4");
        assert_eq!(parse_segment_start("cam01", &name), Some(start()));
        assert_eq!(parse_segment_start("cam02", &name), None);
    }

    #[test]
    fn test_segment_filename_seq() {
        let name = segment_filename_seq("cam01", start(), 2, "mp4");
        assert_eq!(name, "cam01_20240115_120005_2.mp4");
        assert_ne!(name, segment_filename("cam01", start(), "mp4"));
        assert_eq!(parse_segment_start("cam01", &name), Some(start()));
        assert_eq!(parse_segment_start("cam01", "cam01_20240115_120005_.mp4"), None);
        assert_eq!(parse_segment_start("cam01", "cam01_20240115_120005x.mp4"), None);
        assert_eq!(parse_segment_start("cam01", "cam01_garbage.mp4"), None);
    }

    #[test]
    fn test_paths() {
        let root = Path::new("/var/lib/livenvr/recordings");
        assert_eq!(
            segment_path(root, "cam01", "a.mp4"),
            PathBuf::from("/var/lib/livenvr/recordings/cam01/a.mp4")
        );
        assert_eq!(
            manifest_path(Path::new("/srv/streams"), "cam01"),
            PathBuf::from("/srv/streams/cam01/index.m3u8")
        );
    }

    #[test]
    fn test_segment_urls() {
        let name = segment_filename("cam-01", start(), "mp4");
        let download = download_url(BASE, "cam-01", &name);
        assert_eq!(
            download,
            "http://nvr.local:8080/api/recordings/cam-01/segments/cam-01_20240115_120005.mp4"
        );
        assert_eq!(stream_url(BASE, "cam-01", &name), format!("{download}/stream"));
        assert_eq!(storage_key("cam-01", &name), "cam-01/cam-01_20240115_120005.mp4");
    }

    #[test]
    fn test_manifest_url() {
        assert_eq!(
            manifest_url(BASE, "lobby"),
            "http://nvr.local:8080/api/streams/lobby/hls/index.m3u8"
        );
    }

    #[test]
    fn test_safe_component() {
        assert!(is_safe_component("cam_01-north"));
        assert!(!is_safe_component("../etc"));
        assert!(!is_safe_component("a/b"));
        assert!(!is_safe_component(".."));
        assert!(!is_safe_component(""));
    }
}
