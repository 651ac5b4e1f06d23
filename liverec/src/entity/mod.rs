pub mod cameras;
pub mod recording_segments;
