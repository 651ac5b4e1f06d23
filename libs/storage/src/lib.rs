pub mod config;
pub mod gateway;
pub mod key;
pub mod operator;


pub use config::{OssConfig, S3Config, StorageConfig};
pub use gateway::{ByteStream, ObjectStore, StorageGateway};
pub use key::{join_key, validate_key};
pub use operator::{create_operator, init_operator};
