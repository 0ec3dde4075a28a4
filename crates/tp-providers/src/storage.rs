//! `BlockStorageWorker` (spec §4.4): the shared validation pipeline plus a
//! thin provider-transport seam (spec §9 "Storage providers").

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tp_core::error::{ErrorKind, TestProbeError};
use tp_core::types::{BlockStorageDirective, Bucket, TestId, TopicDirective};

use crate::staging::{StagingArea, StagingRegistry};

/// One object read from (or written to) a bucket. Keys are relative to the
/// `<bucket>/<testId>/` prefix described in spec §6.3.
pub type ObjectKey = String;

/// The transport seam every storage provider implements. Validation and
/// staging discipline are identical across providers (spec §4.4); only
/// `fetch_objects`/`put_objects` differ.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn fetch_objects(
        &self,
        bucket: &Bucket,
        prefix: &str,
    ) -> Result<Vec<(ObjectKey, Vec<u8>)>, TestProbeError>;

    async fn put_objects(
        &self,
        bucket: &Bucket,
        prefix: &str,
        files: Vec<(ObjectKey, Vec<u8>)>,
    ) -> Result<(), TestProbeError>;
}

/// Reads/writes a real filesystem tree rooted wherever `file://` resolves
/// to. The development/test default (spec §9 "on-filesystem 'local'
/// provider").
pub struct LocalStorageProvider;

impl LocalStorageProvider {
    pub fn new() -> Self {
        Self
    }

    fn bucket_to_root(bucket: &Bucket) -> Result<PathBuf, TestProbeError> {
        let path = bucket
            .strip_prefix("file://")
            .ok_or_else(|| {
                TestProbeError::new(
                    ErrorKind::BucketUriParse,
                    format!("unsupported bucket scheme: {bucket}"),
                )
            })?;
        Ok(PathBuf::from(path))
    }
}

impl Default for LocalStorageProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    async fn fetch_objects(
        &self,
        bucket: &Bucket,
        _prefix: &str,
    ) -> Result<Vec<(ObjectKey, Vec<u8>)>, TestProbeError> {
        let root = Self::bucket_to_root(bucket)?;
        let mut out = Vec::new();
        walk_dir(&root, &root, &mut out)?;
        Ok(out)
    }

    async fn put_objects(
        &self,
        bucket: &Bucket,
        prefix: &str,
        files: Vec<(ObjectKey, Vec<u8>)>,
    ) -> Result<(), TestProbeError> {
        let root = Self::bucket_to_root(bucket)?.join(prefix);
        for (key, contents) in files {
            let dest = root.join(&key);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TestProbeError::new(ErrorKind::StorageTransport, e.to_string())
                })?;
            }
            std::fs::write(&dest, contents)
                .map_err(|e| TestProbeError::new(ErrorKind::StorageTransport, e.to_string()))?;
        }
        Ok(())
    }
}

fn walk_dir(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(ObjectKey, Vec<u8>)>,
) -> Result<(), TestProbeError> {
    if !dir.exists() {
        return Ok(());
    }
    let entries = std::fs::read_dir(dir)
        .map_err(|e| TestProbeError::new(ErrorKind::StorageTransport, e.to_string()))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| TestProbeError::new(ErrorKind::StorageTransport, e.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            walk_dir(root, &path, out)?;
        } else {
            let contents = std::fs::read(&path)
                .map_err(|e| TestProbeError::new(ErrorKind::StorageTransport, e.to_string()))?;
            let key = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            out.push((key, contents));
        }
    }
    Ok(())
}

/// Topic-directive manifest schema (spec §6.4).
#[derive(Debug, Clone, serde::Deserialize)]
struct ManifestFile {
    topics: Vec<TopicDirective>,
}

/// Wires a `StorageProvider` to the staging registry and enforces the
/// validation pipeline that is identical across providers.
pub struct BlockStorageWorker {
    provider: Arc<dyn StorageProvider>,
    staging: StagingRegistry,
    topic_directive_file_name: String,
}

impl BlockStorageWorker {
    pub fn new(
        provider: Arc<dyn StorageProvider>,
        staging: StagingRegistry,
        topic_directive_file_name: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            staging,
            topic_directive_file_name: topic_directive_file_name.into(),
        }
    }

    /// Download the bundle into a test-scoped staging area, parse and
    /// validate it, and emit the resulting directive (spec §4.4).
    pub async fn fetch(
        &self,
        test_id: TestId,
        bucket: Bucket,
    ) -> Result<BlockStorageDirective, TestProbeError> {
        let staging = self.staging.acquire(test_id);
        match self.fetch_inner(test_id, bucket, &staging).await {
            Ok(directive) => Ok(directive),
            Err(e) => {
                // Cleanup guarantee: release on both success and failure.
                staging.release();
                Err(e)
            }
        }
    }

    async fn fetch_inner(
        &self,
        test_id: TestId,
        bucket: Bucket,
        staging: &StagingArea,
    ) -> Result<BlockStorageDirective, TestProbeError> {
        let prefix = test_id.to_string();
        let objects = self.provider.fetch_objects(&bucket, &prefix).await?;

        let mut features_count = 0usize;
        let mut manifest_bytes: Option<Vec<u8>> = None;

        for (key, contents) in objects {
            if key.starts_with("features/") && !key.ends_with('/') {
                features_count += 1;
            }
            if key == self.topic_directive_file_name {
                manifest_bytes = Some(contents.clone());
            }
            staging.write(&key, contents).map_err(|e| {
                TestProbeError::new(ErrorKind::StorageTransport, e.to_string())
            })?;
        }

        if features_count == 0 && staging.list_prefix("features").is_empty() {
            return Err(TestProbeError::new(
                ErrorKind::MissingFeaturesDirectory,
                "bundle has no features/ directory".to_string(),
            ));
        }
        if features_count == 0 {
            return Err(TestProbeError::new(
                ErrorKind::EmptyFeaturesDirectory,
                "features/ directory is empty".to_string(),
            ));
        }

        let manifest_bytes = manifest_bytes.ok_or_else(|| {
            TestProbeError::new(
                ErrorKind::MissingTopicDirectiveFile,
                format!("missing {}", self.topic_directive_file_name),
            )
        })?;

        let manifest: ManifestFile = serde_yaml::from_slice(&manifest_bytes).map_err(|e| {
            TestProbeError::new(ErrorKind::InvalidTopicDirectiveFormat, e.to_string())
        })?;
        validate_manifest(&manifest)?;

        Ok(BlockStorageDirective {
            staged_location: PathBuf::from(&prefix),
            evidence_dir: PathBuf::from(&prefix).join("evidence"),
            topic_directives: manifest.topics,
            bucket,
        })
    }

    /// Mirror the evidence directory back to the bucket under
    /// `{prefix}/evidence/`, then delete the staging tree unconditionally.
    pub async fn upload(
        &self,
        test_id: TestId,
        bucket: Bucket,
        evidence: HashMap<ObjectKey, Vec<u8>>,
    ) -> Result<(), TestProbeError> {
        let prefix = test_id.to_string();
        let files: Vec<(ObjectKey, Vec<u8>)> = evidence
            .into_iter()
            .map(|(k, v)| (format!("evidence/{k}"), v))
            .collect();
        let result = self.provider.put_objects(&bucket, &prefix, files).await;
        // The staging area must be deleted on both the success and the
        // failure path of every operation (spec §4.4 cleanup guarantee).
        let staging = self.staging.acquire(test_id);
        staging.release();
        result
    }
}

fn validate_manifest(manifest: &ManifestFile) -> Result<(), TestProbeError> {
    for t in &manifest.topics {
        if t.topic.trim().is_empty() || t.client_principal.trim().is_empty() {
            return Err(TestProbeError::new(
                ErrorKind::InvalidTopicDirectiveFormat,
                "topic and clientPrincipal must be non-empty".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    struct InMemoryProvider {
        objects: Vec<(ObjectKey, Vec<u8>)>,
        uploaded: Arc<AsyncMutex<Vec<(ObjectKey, Vec<u8>)>>>,
    }

    #[async_trait]
    impl StorageProvider for InMemoryProvider {
        async fn fetch_objects(
            &self,
            _bucket: &Bucket,
            _prefix: &str,
        ) -> Result<Vec<(ObjectKey, Vec<u8>)>, TestProbeError> {
            Ok(self.objects.clone())
        }

        async fn put_objects(
            &self,
            _bucket: &Bucket,
            _prefix: &str,
            files: Vec<(ObjectKey, Vec<u8>)>,
        ) -> Result<(), TestProbeError> {
            self.uploaded.lock().await.extend(files);
            Ok(())
        }
    }

    fn manifest_yaml() -> Vec<u8> {
        b"topics:\n  - topic: orders\n    role: PRODUCER\n    clientPrincipal: alpha\n"
            .to_vec()
    }

    #[tokio::test]
    async fn fetch_validates_and_emits_directive() {
        let provider = Arc::new(InMemoryProvider {
            objects: vec![
                ("features/orders.feature".into(), b"Feature: orders".to_vec()),
                ("topic-directives.yaml".into(), manifest_yaml()),
            ],
            uploaded: Arc::new(AsyncMutex::new(Vec::new())),
        });
        let worker = BlockStorageWorker::new(
            provider,
            StagingRegistry::new(),
            "topic-directives.yaml",
        );
        let directive = worker
            .fetch(uuid::Uuid::new_v4(), "file:///tmp/bundle".to_string())
            .await
            .unwrap();
        assert_eq!(directive.topic_directives.len(), 1);
        assert_eq!(directive.topic_directives[0].topic, "orders");
    }

    #[tokio::test]
    async fn fetch_fails_on_missing_features_directory() {
        let provider = Arc::new(InMemoryProvider {
            objects: vec![("topic-directives.yaml".into(), manifest_yaml())],
            uploaded: Arc::new(AsyncMutex::new(Vec::new())),
        });
        let staging = StagingRegistry::new();
        let worker = BlockStorageWorker::new(provider, staging.clone(), "topic-directives.yaml");
        let test_id = uuid::Uuid::new_v4();
        let err = worker
            .fetch(test_id, "file:///tmp/bundle".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingFeaturesDirectory);
        // Cleanup guarantee: staging released even on failure.
        assert!(staging.is_empty_or_released(test_id));
    }

    #[tokio::test]
    async fn fetch_fails_on_missing_manifest() {
        let provider = Arc::new(InMemoryProvider {
            objects: vec![("features/a.feature".into(), b"Feature: a".to_vec())],
            uploaded: Arc::new(AsyncMutex::new(Vec::new())),
        });
        let worker = BlockStorageWorker::new(
            provider,
            StagingRegistry::new(),
            "topic-directives.yaml",
        );
        let err = worker
            .fetch(uuid::Uuid::new_v4(), "file:///tmp/bundle".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingTopicDirectiveFile);
    }

    #[tokio::test]
    async fn upload_releases_staging_area() {
        let uploaded = Arc::new(AsyncMutex::new(Vec::new()));
        let provider = Arc::new(InMemoryProvider {
            objects: vec![],
            uploaded: uploaded.clone(),
        });
        let staging = StagingRegistry::new();
        let test_id = uuid::Uuid::new_v4();
        let worker = BlockStorageWorker::new(provider, staging.clone(), "topic-directives.yaml");

        let mut evidence = HashMap::new();
        evidence.insert("cucumber.json".to_string(), b"{}".to_vec());
        worker
            .upload(test_id, "file:///tmp/bundle".to_string(), evidence)
            .await
            .unwrap();

        assert!(staging.is_empty_or_released(test_id));
        assert_eq!(uploaded.lock().await.len(), 1);
    }
}
