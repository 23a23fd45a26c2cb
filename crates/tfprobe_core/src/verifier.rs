//! Live-state verification against the cloud provider.
//!
//! The provider is consumed through [`ResourceProvider`], a read-only
//! describe call. [`AwsCliProvider`] adapts the `aws` CLI; [`MockProvider`]
//! is an in-memory stand-in for tests.

use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::VerificationError;

/// One resource as the provider describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescription {
    pub id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ResourceDescription {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Failures of the describe call itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{0}")]
    Unreachable(String),

    #[error("unsupported resource kind: {0}")]
    UnsupportedKind(String),
}

/// Read-only query surface of the cloud provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// All resources of `kind` named `id` in `region`. Empty means not found.
    async fn describe(
        &self,
        kind: &str,
        region: &str,
        id: &str,
    ) -> Result<Vec<ResourceDescription>, ProviderError>;
}

/// Asserts on provisioned state. Never mutates anything.
#[derive(Clone)]
pub struct StateVerifier {
    provider: Arc<dyn ResourceProvider>,
}

impl StateVerifier {
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self { provider }
    }

    /// Exactly one resource of `kind` named `id` exists in `region`.
    pub async fn assert_exists(
        &self,
        kind: &str,
        region: &str,
        id: &str,
    ) -> Result<(), VerificationError> {
        self.describe_one(kind, region, id).await.map(|_| ())
    }

    /// The resource exists and every expected property has the expected value.
    pub async fn assert_properties(
        &self,
        kind: &str,
        region: &str,
        id: &str,
        expected: &BTreeMap<String, String>,
    ) -> Result<(), VerificationError> {
        let resource = self.describe_one(kind, region, id).await?;
        for (key, value) in expected {
            let actual = resource.properties.get(key);
            if actual != Some(value) {
                return Err(VerificationError::PropertyMismatch {
                    kind: kind.to_string(),
                    id: id.to_string(),
                    key: key.clone(),
                    expected: value.clone(),
                    actual: actual.cloned(),
                });
            }
        }
        Ok(())
    }

    async fn describe_one(
        &self,
        kind: &str,
        region: &str,
        id: &str,
    ) -> Result<ResourceDescription, VerificationError> {
        debug!(kind, region, id, "Describing resource");
        let mut matches = self
            .provider
            .describe(kind, region, id)
            .await
            .map_err(|e| match e {
                ProviderError::UnsupportedKind(kind) => VerificationError::UnsupportedKind(kind),
                ProviderError::Unreachable(message) => VerificationError::Unreachable {
                    kind: kind.to_string(),
                    id: id.to_string(),
                    message,
                },
            })?;

        match matches.len() {
            0 => Err(VerificationError::Absent {
                kind: kind.to_string(),
                region: region.to_string(),
                id: id.to_string(),
            }),
            1 => {
                info!(kind, region, id, "Resource exists");
                Ok(matches.remove(0))
            }
            count => Err(VerificationError::Ambiguous {
                kind: kind.to_string(),
                region: region.to_string(),
                id: id.to_string(),
                count,
            }),
        }
    }
}

/// How one resource kind is queried through the `aws` CLI.
struct AwsQuery {
    args: Vec<String>,
    not_found_markers: &'static [&'static str],
    properties: fn(&serde_json::Value) -> BTreeMap<String, String>,
}

impl AwsQuery {
    fn new(
        args: &[&str],
        not_found_markers: &'static [&'static str],
        properties: fn(&serde_json::Value) -> BTreeMap<String, String>,
    ) -> Self {
        Self {
            args: args.iter().map(|s| s.to_string()).collect(),
            not_found_markers,
            properties,
        }
    }
}

/// Provider backed by the `aws` CLI.
///
/// Supported kinds: `s3-bucket`, `dynamodb-table`, `sqs-queue`.
pub struct AwsCliProvider {
    program: String,
    env: BTreeMap<String, String>,
}

impl Default for AwsCliProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AwsCliProvider {
    pub fn new() -> Self {
        Self {
            program: "aws".to_string(),
            env: BTreeMap::new(),
        }
    }

    /// Use a different `aws` executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Environment (profile, credentials) for every query.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    fn query(kind: &str, region: &str, id: &str) -> Result<AwsQuery, ProviderError> {
        let mut query = match kind {
            "s3-bucket" => AwsQuery::new(
                &["s3api", "head-bucket", "--bucket", id],
                &["Not Found", "(404)", "NoSuchBucket"],
                s3_properties,
            ),
            "dynamodb-table" => AwsQuery::new(
                &["dynamodb", "describe-table", "--table-name", id],
                &["ResourceNotFoundException"],
                dynamodb_properties,
            ),
            "sqs-queue" => AwsQuery::new(
                &["sqs", "get-queue-url", "--queue-name", id],
                &["NonExistentQueue", "QueueDoesNotExist"],
                sqs_properties,
            ),
            other => return Err(ProviderError::UnsupportedKind(other.to_string())),
        };
        query.args.extend(
            ["--region", region, "--output", "json"]
                .iter()
                .map(|s| s.to_string()),
        );
        Ok(query)
    }
}

fn string_field(value: &serde_json::Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(|v| v.as_str()).map(String::from)
}

fn s3_properties(value: &serde_json::Value) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    if let Some(region) = string_field(value, "/BucketRegion") {
        properties.insert("region".to_string(), region);
    }
    properties
}

fn dynamodb_properties(value: &serde_json::Value) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    if let Some(status) = string_field(value, "/Table/TableStatus") {
        properties.insert("status".to_string(), status);
    }
    if let Some(arn) = string_field(value, "/Table/TableArn") {
        properties.insert("arn".to_string(), arn);
    }
    properties
}

fn sqs_properties(value: &serde_json::Value) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    if let Some(url) = string_field(value, "/QueueUrl") {
        properties.insert("url".to_string(), url);
    }
    properties
}

#[async_trait]
impl ResourceProvider for AwsCliProvider {
    async fn describe(
        &self,
        kind: &str,
        region: &str,
        id: &str,
    ) -> Result<Vec<ResourceDescription>, ProviderError> {
        let query = Self::query(kind, region, id)?;
        debug!("Executing: {} {}", self.program, query.args.join(" "));

        let output = tokio::process::Command::new(&self.program)
            .args(&query.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ProviderError::Unreachable(format!("failed to run {}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            if query.not_found_markers.iter().any(|m| stderr.contains(m)) {
                return Ok(Vec::new());
            }
            return Err(ProviderError::Unreachable(stderr.trim().to_string()));
        }

        let parsed = if stdout.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(stdout.trim()).map_err(|e| {
                ProviderError::Unreachable(format!("unparseable {} response: {}", kind, e))
            })?
        };

        Ok(vec![ResourceDescription {
            id: id.to_string(),
            properties: (query.properties)(&parsed),
        }])
    }
}

/// In-memory provider for tests.
#[derive(Clone, Default)]
pub struct MockProvider {
    resources: Arc<RwLock<HashMap<(String, String), Vec<ResourceDescription>>>>,
    unreachable: Arc<RwLock<Option<String>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource of `kind` in `region`.
    pub fn insert(&self, kind: &str, region: &str, resource: ResourceDescription) {
        self.resources
            .write()
            .entry((kind.to_string(), region.to_string()))
            .or_default()
            .push(resource);
    }

    /// Remove every resource of `kind` named `id` in `region`.
    pub fn remove(&self, kind: &str, region: &str, id: &str) {
        if let Some(list) = self
            .resources
            .write()
            .get_mut(&(kind.to_string(), region.to_string()))
        {
            list.retain(|r| r.id != id);
        }
    }

    /// Make every describe call fail as unreachable.
    pub fn set_unreachable(&self, message: Option<String>) {
        *self.unreachable.write() = message;
    }
}

#[async_trait]
impl ResourceProvider for MockProvider {
    async fn describe(
        &self,
        kind: &str,
        region: &str,
        id: &str,
    ) -> Result<Vec<ResourceDescription>, ProviderError> {
        if let Some(message) = self.unreachable.read().clone() {
            return Err(ProviderError::Unreachable(message));
        }
        Ok(self
            .resources
            .read()
            .get(&(kind.to_string(), region.to_string()))
            .map(|list| list.iter().filter(|r| r.id == id).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn verifier(provider: MockProvider) -> StateVerifier {
        StateVerifier::new(Arc::new(provider))
    }

    #[tokio::test]
    async fn test_assert_exists() {
        let provider = MockProvider::new();
        provider.insert(
            "s3-bucket",
            "us-east-1",
            ResourceDescription::new("terratest-s3-bucket-abc123"),
        );
        let v = verifier(provider);

        v.assert_exists("s3-bucket", "us-east-1", "terratest-s3-bucket-abc123")
            .await
            .unwrap();

        let err = v
            .assert_exists("s3-bucket", "eu-west-1", "terratest-s3-bucket-abc123")
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::Absent { .. }));
    }

    #[tokio::test]
    async fn test_ambiguous_and_unreachable() {
        let provider = MockProvider::new();
        provider.insert("sqs-queue", "us-east-1", ResourceDescription::new("q"));
        provider.insert("sqs-queue", "us-east-1", ResourceDescription::new("q"));
        let v = verifier(provider.clone());

        let err = v.assert_exists("sqs-queue", "us-east-1", "q").await.unwrap_err();
        assert!(matches!(err, VerificationError::Ambiguous { count: 2, .. }));

        provider.set_unreachable(Some("connection refused".to_string()));
        let err = v.assert_exists("sqs-queue", "us-east-1", "q").await.unwrap_err();
        assert!(matches!(err, VerificationError::Unreachable { message, .. } if message == "connection refused"));
    }

    #[tokio::test]
    async fn test_assert_properties() {
        let provider = MockProvider::new();
        provider.insert(
            "dynamodb-table",
            "us-east-1",
            ResourceDescription::new("t").with_property("status", "ACTIVE"),
        );
        let v = verifier(provider);

        let mut expected = BTreeMap::new();
        expected.insert("status".to_string(), "ACTIVE".to_string());
        v.assert_properties("dynamodb-table", "us-east-1", "t", &expected)
            .await
            .unwrap();

        expected.insert("status".to_string(), "DELETING".to_string());
        let err = v
            .assert_properties("dynamodb-table", "us-east-1", "t", &expected)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerificationError::PropertyMismatch { actual: Some(ref a), .. } if a == "ACTIVE"
        ));
    }

    #[tokio::test]
    async fn test_verifier_queries_provider_once_with_exact_arguments() {
        let mut provider = MockResourceProvider::new();
        provider
            .expect_describe()
            .with(eq("s3-bucket"), eq("us-east-1"), eq("probe-1"))
            .times(1)
            .returning(|_, _, id| Ok(vec![ResourceDescription::new(id)]));

        StateVerifier::new(Arc::new(provider))
            .assert_exists("s3-bucket", "us-east-1", "probe-1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_kind_maps_through() {
        let mut provider = MockResourceProvider::new();
        provider
            .expect_describe()
            .returning(|kind, _, _| Err(ProviderError::UnsupportedKind(kind.to_string())));

        let err = StateVerifier::new(Arc::new(provider))
            .assert_exists("ec2-instance", "us-east-1", "i-1")
            .await
            .unwrap_err();
        assert_eq!(err, VerificationError::UnsupportedKind("ec2-instance".to_string()));
    }

    #[test]
    fn test_aws_queries() {
        let q = AwsCliProvider::query("s3-bucket", "us-east-1", "probe-1").unwrap();
        assert_eq!(
            q.args,
            vec!["s3api", "head-bucket", "--bucket", "probe-1", "--region", "us-east-1", "--output", "json"]
        );
        assert!(AwsCliProvider::query("dynamodb-table", "us-east-1", "t").is_ok());
        assert!(AwsCliProvider::query("sqs-queue", "us-east-1", "q").is_ok());
        assert!(matches!(
            AwsCliProvider::query("ec2-instance", "us-east-1", "i"),
            Err(ProviderError::UnsupportedKind(_))
        ));
    }

    #[test]
    fn test_aws_property_extraction() {
        let table = serde_json::json!({"Table": {"TableStatus": "ACTIVE", "TableArn": "arn:t"}});
        let props = dynamodb_properties(&table);
        assert_eq!(props.get("status").map(String::as_str), Some("ACTIVE"));
        assert_eq!(props.get("arn").map(String::as_str), Some("arn:t"));

        assert!(s3_properties(&serde_json::Value::Null).is_empty());
        let bucket = serde_json::json!({"BucketRegion": "us-east-1"});
        assert_eq!(s3_properties(&bucket).get("region").map(String::as_str), Some("us-east-1"));
    }
}
