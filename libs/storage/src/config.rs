use serde::{Deserialize, Serialize};

/// Where recorded segment bytes live.
///
/// With `fs` rooted at the recorder root the encoder output is already in
/// place; `s3` and `oss` require `recorder.upload = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Fs {
        #[serde(default = "default_fs_root")]
        root: String,
    },
    S3(S3Config),
    Oss(OssConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_bucket_root")]
    pub root: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services (MinIO, Ceph)
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub disable_config_load: bool,
    #[serde(default)]
    pub enable_virtual_host_style: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OssConfig {
    pub bucket: String,
    #[serde(default = "default_bucket_root")]
    pub root: String,
    pub region: String,
    pub endpoint: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub access_key_secret: Option<String>,
    #[serde(default)]
    pub security_token: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Fs {
            root: default_fs_root(),
        }
    }
}

fn default_fs_root() -> String {
    "./recordings".to_string()
}

fn default_bucket_root() -> String {
    "/".to_string()
}
