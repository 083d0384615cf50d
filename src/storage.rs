use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object storage error: {0}")]
    Backend(String),
}

/// External object storage for file/image attachments. `put` stores the
/// bytes under `key` and returns the public URL clients should embed in
/// their messages.
#[rocket::async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, mime_type: &str)
    -> Result<String, StorageError>;
}

/// S3-style HTTP backend: `PUT {endpoint}/{bucket}/{key}`.
pub struct HttpObjectStorage {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    public_base: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(endpoint: &str, bucket: &str, public_base: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        HttpObjectStorage {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            public_base: public_base.map(|s| s.trim_end_matches('/').to_string()),
        }
    }

    fn public_url(&self, key: &str) -> String {
        match &self.public_base {
            Some(base) => format!("{base}/{key}"),
            None => format!("{}/{}/{key}", self.endpoint, self.bucket),
        }
    }
}

#[rocket::async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<String, StorageError> {
        let url = format!("{}/{}/{key}", self.endpoint, self.bucket);
        let resp = self
            .client
            .put(&url)
            .header("Content-Type", mime_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(StorageError::Backend(format!("HTTP {}", resp.status())));
        }
        Ok(self.public_url(key))
    }
}

/// Local-directory backend for single-node deployments and tests.
pub struct LocalObjectStorage {
    dir: std::path::PathBuf,
    public_base: String,
}

impl LocalObjectStorage {
    pub fn new(dir: &str, public_base: Option<&str>) -> Self {
        LocalObjectStorage {
            dir: std::path::PathBuf::from(dir),
            public_base: public_base
                .unwrap_or("/files")
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

#[rocket::async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _mime_type: &str,
    ) -> Result<String, StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let path = self.dir.join(key);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(format!("{}/{key}", self.public_base))
    }
}
