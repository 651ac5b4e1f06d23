pub const RECORDINGS: &str = "/api/recordings";
pub const STREAMS: &str = "/api/streams";
pub const STREAM_PROFILES: &str = "/api/streams/profiles";
pub const CLEANUP: &str = "/api/cleanup";

pub fn recording(camera: &str) -> String {
    format!("/api/recordings/{}", camera)
}

pub fn segment(camera: &str, filename: &str) -> String {
    format!("/api/recordings/{}/segments/{}", camera, filename)
}

pub fn segment_stream(camera: &str, filename: &str) -> String {
    format!("/api/recordings/{}/segments/{}/stream", camera, filename)
}

pub fn stream(camera: &str) -> String {
    format!("/api/streams/{}", camera)
}

pub fn stream_quality(camera: &str) -> String {
    format!("/api/streams/{}/quality", camera)
}

pub fn hls(camera: &str, file: &str) -> String {
    format!("/api/streams/{}/hls/{}", camera, file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_paths_share_prefix() {
        let download = segment("cam01", "cam01_20240115_120000.mp4");
        assert_eq!(
            download,
            "/api/recordings/cam01/segments/cam01_20240115_120000.mp4"
        );
        assert_eq!(
            segment_stream("cam01", "cam01_20240115_120000.mp4"),
            format!("{download}/stream")
        );
        assert!(download.starts_with(&recording("cam01")));
    }

    #[test]
    fn test_stream_paths() {
        assert_eq!(stream("lobby"), "/api/streams/lobby");
        assert_eq!(stream_quality("lobby"), "/api/streams/lobby/quality");
        assert_eq!(hls("lobby", "index.m3u8"), "/api/streams/lobby/hls/index.m3u8");
    }
}
