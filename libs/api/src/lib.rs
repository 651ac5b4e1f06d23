pub mod path;
pub mod recording;
pub mod retention;
pub mod stream;
