//! S3-based state storage backend.
//!
//! Stacks are stored as `<prefix>/<tenant>/<project>/<stack>/state.json`
//! objects, so one bucket can hold every stack of an organisation.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::StateStore;
use super::types::{STATE_VERSION, StackKey, State};

/// State object name.
const STATE_KEY: &str = "state.json";

/// Lock object name.
const LOCK_KEY: &str = "state.lock";

/// S3-based state store.
#[derive(Debug, Clone)]
pub struct S3StateStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix, empty or ending with `/`.
    prefix: String,
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        })
        .unwrap_or_default()
}

impl S3StateStore {
    /// Creates a new S3 state store from the ambient AWS configuration.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a new S3 state store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Gets the full object key of a stack file.
    fn key(&self, stack: &StackKey, file: &str) -> String {
        object_key(&self.prefix, stack, file)
    }

    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| StateError::s3(format!("Failed to read S3 object: {e}")))?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| StateError::Corrupted {
                    message: format!("Invalid UTF-8 in S3 object: {e}"),
                })?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StateError::s3(format!("S3 get error: {service_err}")).into())
                }
            }
        }
    }

    async fn put_object(&self, key: &str, content: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 put error: {e}")))?;

        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 delete error: {e}")))?;

        Ok(())
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StateError::s3(format!("S3 head error: {service_err}")).into())
                }
            }
        }
    }

    async fn read_lock(&self, key: &str) -> Result<Option<LockInfo>> {
        let Some(content) = self.get_object(key).await? else {
            return Ok(None);
        };

        let lock_info = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse lock: {e}"),
        })?;
        Ok(Some(lock_info))
    }
}

/// Builds `<prefix><tenant>/<project>/<stack>/<file>`.
fn object_key(prefix: &str, stack: &StackKey, file: &str) -> String {
    let [tenant, project, name] = stack.segments();
    format!("{prefix}{tenant}/{project}/{name}/{file}")
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self, stack: &StackKey) -> Result<Option<State>> {
        let key = self.key(stack, STATE_KEY);
        debug!("Loading state from s3://{}/{key}", self.bucket);

        let Some(json) = self.get_object(&key).await? else {
            debug!("No state found in S3 for {stack}");
            return Ok(None);
        };

        let state: State = serde_json::from_str(&json).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse state: {e}"),
        })?;

        if state.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }
            .into());
        }

        info!("Loaded state for stack {stack} (serial {})", state.serial);
        Ok(Some(state))
    }

    async fn save(&self, stack: &StackKey, state: &State) -> Result<()> {
        let key = self.key(stack, STATE_KEY);
        info!("Saving state to s3://{}/{key}", self.bucket);

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        // A single PUT replaces the object atomically.
        self.put_object(&key, &content).await?;

        debug!("State saved successfully to S3");
        Ok(())
    }

    async fn delete(&self, stack: &StackKey) -> Result<()> {
        let state_key = self.key(stack, STATE_KEY);
        let lock_key = self.key(stack, LOCK_KEY);

        info!("Deleting state from s3://{}/{state_key}", self.bucket);

        self.delete_object(&state_key).await?;
        self.delete_object(&lock_key).await?;

        Ok(())
    }

    async fn exists(&self, stack: &StackKey) -> Result<bool> {
        self.object_exists(&self.key(stack, STATE_KEY)).await
    }

    async fn acquire_lock(&self, stack: &StackKey, holder: &str) -> Result<LockInfo> {
        let key = self.key(stack, LOCK_KEY);

        if let Some(existing) = self.read_lock(&key).await? {
            if !existing.is_expired() {
                return Err(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            debug!("Expired lock on {stack} found, taking over");
        }

        let lock_info = LockInfo::new(stack, holder);

        let content = serde_json::to_string_pretty(&lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        self.put_object(&key, &content).await?;

        info!(
            "Acquired state lock on {stack}: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, stack: &StackKey, lock_id: &str) -> Result<()> {
        let key = self.key(stack, LOCK_KEY);

        if let Some(existing) = self.read_lock(&key).await? {
            if existing.lock_id == lock_id {
                self.delete_object(&key).await?;
                info!("Released state lock on {stack}: {lock_id}");
            } else {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
        }

        Ok(())
    }

    async fn get_lock_info(&self, stack: &StackKey) -> Result<Option<LockInfo>> {
        self.read_lock(&self.key(stack, LOCK_KEY)).await
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("")), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("/stacks/")), "stacks/");
        assert_eq!(normalize_prefix(Some("org/stacks")), "org/stacks/");
    }

    #[test]
    fn test_object_key_layout() {
        let stack = StackKey::new("acme", "web", "dev");
        assert_eq!(object_key("", &stack, STATE_KEY), "acme/web/dev/state.json");
        assert_eq!(
            object_key("stacks/", &stack, LOCK_KEY),
            "stacks/acme/web/dev/state.lock"
        );
    }
}
