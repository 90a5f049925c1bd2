//! TOML configuration for the stack declaration.
//!
//! All deploy-time parameters live in one immutable [`Config`] that is loaded
//! once and passed by reference into the declaration and the commands. Only
//! what can be checked locally is validated here (required fields, ARN shapes,
//! prefix shape, region agreement); whether the vector collection or its
//! cross-stack export actually exists is left to the deployment engine.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub stack: StackConfig,
    pub knowledge_base: KnowledgeBaseConfig,
    #[serde(default)]
    pub vector_index: VectorIndexConfig,
    #[serde(default)]
    pub data_source: DataSourceConfig,
    #[serde(default)]
    pub bucket: BucketConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Target CloudFormation stack: its name and the region it deploys to.
/// The account half of the target comes from the submitted credentials.
#[derive(Debug, Deserialize, Clone)]
pub struct StackConfig {
    #[serde(default = "default_stack_name")]
    pub name: String,
    pub region: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeBaseConfig {
    #[serde(default = "default_kb_name")]
    pub name: String,
    /// Bedrock foundation-model ARN used for embeddings. Must live in the
    /// stack's region.
    pub embedding_model_arn: String,
    /// Name of the cross-stack export holding the OpenSearch Serverless
    /// collection ARN. Mutually exclusive with `collection_arn`.
    #[serde(default)]
    pub collection_import: Option<String>,
    /// Literal collection ARN, for when the collection is not exported by
    /// another stack. Mutually exclusive with `collection_import`.
    #[serde(default)]
    pub collection_arn: Option<String>,
}

/// How the knowledge base addresses the external vector index.
///
/// The field mapping must match the index schema; a mismatch only surfaces
/// at ingestion time, which is why nothing beyond "non-empty and distinct"
/// is checked here.
#[derive(Debug, Deserialize, Clone)]
pub struct VectorIndexConfig {
    #[serde(default = "default_index_name")]
    pub name: String,
    #[serde(default = "default_vector_field")]
    pub vector_field: String,
    #[serde(default = "default_text_field")]
    pub text_field: String,
    #[serde(default = "default_metadata_field")]
    pub metadata_field: String,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
            vector_field: default_vector_field(),
            text_field: default_text_field(),
            metadata_field: default_metadata_field(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataSourceConfig {
    #[serde(default = "default_data_source_name")]
    pub name: String,
    /// Key prefix under which documents live in the bucket. Feeds both the
    /// role's read grant and the data source's inclusion prefix list, so the
    /// two cannot drift apart.
    #[serde(default = "default_docs_prefix")]
    pub docs_prefix: String,
    #[serde(default)]
    pub parsing_strategy: ParsingStrategy,
    /// Model ARN for `BEDROCK_FOUNDATION_MODEL` parsing. Rejected for other
    /// strategies.
    #[serde(default)]
    pub parsing_model_arn: Option<String>,
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            name: default_data_source_name(),
            docs_prefix: default_docs_prefix(),
            parsing_strategy: ParsingStrategy::default(),
            parsing_model_arn: None,
            deletion_policy: DeletionPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BucketConfig {
    /// Keep the bucket (and the documents in it) when the stack is deleted.
    /// Turning this off makes teardown destroy the documents irreversibly.
    #[serde(default = "default_true")]
    pub retain_on_delete: bool,
    #[serde(default = "default_true")]
    pub versioned: bool,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            retain_on_delete: true,
            versioned: true,
        }
    }
}

/// Settings for `kbstack serve chat`.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bedrock model ARN used to generate answers. Required to serve.
    #[serde(default)]
    pub generation_model_arn: Option<String>,
    /// Knowledge base id override. When unset the server reads it from the
    /// deployed stack's outputs at startup.
    #[serde(default)]
    pub knowledge_base_id: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            generation_model_arn: None,
            knowledge_base_id: None,
        }
    }
}

/// How the managed ingestion service turns documents into text.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParsingStrategy {
    BedrockDataAutomation,
    BedrockFoundationModel,
}

impl Default for ParsingStrategy {
    fn default() -> Self {
        ParsingStrategy::BedrockDataAutomation
    }
}

impl ParsingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParsingStrategy::BedrockDataAutomation => "BEDROCK_DATA_AUTOMATION",
            ParsingStrategy::BedrockFoundationModel => "BEDROCK_FOUNDATION_MODEL",
        }
    }
}

/// Whether removing the data source also deletes already-ingested vectors.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionPolicy {
    Delete,
    Retain,
}

impl Default for DeletionPolicy {
    fn default() -> Self {
        DeletionPolicy::Delete
    }
}

impl DeletionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionPolicy::Delete => "DELETE",
            DeletionPolicy::Retain => "RETAIN",
        }
    }
}

/// Resolved reference to the external vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionRef<'a> {
    /// Cross-stack export name, resolved by the deployment engine.
    Import(&'a str),
    /// Literal collection ARN.
    Arn(&'a str),
}

impl KnowledgeBaseConfig {
    /// The collection reference, or an error when the config names none
    /// (or both). Called at load time so a missing reference fails before
    /// any resource is created.
    pub fn collection_ref(&self) -> Result<CollectionRef<'_>> {
        match (&self.collection_import, &self.collection_arn) {
            (Some(name), None) => Ok(CollectionRef::Import(name)),
            (None, Some(arn)) => Ok(CollectionRef::Arn(arn)),
            (Some(_), Some(_)) => bail!(
                "set either knowledge_base.collection_import or \
                 knowledge_base.collection_arn, not both"
            ),
            (None, None) => bail!(
                "vector collection reference is missing: set \
                 knowledge_base.collection_import (cross-stack export name) \
                 or knowledge_base.collection_arn"
            ),
        }
    }
}

fn default_stack_name() -> String {
    "bedrock-kb-with-s3-source".to_string()
}
fn default_kb_name() -> String {
    "bedrock-kb".to_string()
}
fn default_index_name() -> String {
    "bedrock-knowledge-base-index".to_string()
}
fn default_vector_field() -> String {
    "vector".to_string()
}
fn default_text_field() -> String {
    "text".to_string()
}
fn default_metadata_field() -> String {
    "metadata".to_string()
}
fn default_data_source_name() -> String {
    "kb-s3-data-source".to_string()
}
fn default_docs_prefix() -> String {
    "kb/".to_string()
}
fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}
fn default_true() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Stack
    validate_stack_name(&config.stack.name)?;
    if config.stack.region.is_empty() {
        bail!("stack.region must not be empty");
    }
    if !config
        .stack
        .region
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!("stack.region '{}' is not a region name", config.stack.region);
    }

    // Knowledge base
    if config.knowledge_base.name.is_empty() {
        bail!("knowledge_base.name must not be empty");
    }
    validate_model_arn(
        &config.knowledge_base.embedding_model_arn,
        &config.stack.region,
        "knowledge_base.embedding_model_arn",
    )?;
    match config.knowledge_base.collection_ref()? {
        CollectionRef::Import(name) => {
            if name.is_empty() {
                bail!("knowledge_base.collection_import must not be empty");
            }
        }
        CollectionRef::Arn(arn) => validate_collection_arn(arn)?,
    }

    // Vector index
    let idx = &config.vector_index;
    if idx.name.is_empty() {
        bail!("vector_index.name must not be empty");
    }
    for (field, value) in [
        ("vector_field", &idx.vector_field),
        ("text_field", &idx.text_field),
        ("metadata_field", &idx.metadata_field),
    ] {
        if value.is_empty() {
            bail!("vector_index.{} must not be empty", field);
        }
    }
    if idx.vector_field == idx.text_field
        || idx.vector_field == idx.metadata_field
        || idx.text_field == idx.metadata_field
    {
        bail!("vector_index field names must be distinct");
    }

    // Data source
    if config.data_source.name.is_empty() {
        bail!("data_source.name must not be empty");
    }
    validate_docs_prefix(&config.data_source.docs_prefix)?;
    match config.data_source.parsing_strategy {
        ParsingStrategy::BedrockFoundationModel => match &config.data_source.parsing_model_arn {
            Some(arn) => {
                validate_model_arn(arn, &config.stack.region, "data_source.parsing_model_arn")?
            }
            None => bail!(
                "data_source.parsing_model_arn is required when \
                 parsing_strategy is BEDROCK_FOUNDATION_MODEL"
            ),
        },
        ParsingStrategy::BedrockDataAutomation => {
            if config.data_source.parsing_model_arn.is_some() {
                bail!(
                    "data_source.parsing_model_arn only applies when \
                     parsing_strategy is BEDROCK_FOUNDATION_MODEL"
                );
            }
        }
    }

    // Server: only what is syntactically checkable; the rest at serve time
    if let Some(arn) = &config.server.generation_model_arn {
        validate_model_arn(arn, &config.stack.region, "server.generation_model_arn")?;
    }

    Ok(())
}

/// CloudFormation stack names start with a letter, then letters, digits and
/// hyphens, at most 128 characters.
fn validate_stack_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => chars.all(|c| c.is_ascii_alphanumeric() || c == '-'),
        _ => false,
    };
    if !valid || name.len() > 128 {
        bail!(
            "stack.name '{}' is invalid: must start with a letter and contain \
             only letters, digits and hyphens (max 128 chars)",
            name
        );
    }
    Ok(())
}

/// A Bedrock foundation-model ARN in the stack's region:
/// `arn:<partition>:bedrock:<region>::foundation-model/<model-id>`.
fn validate_model_arn(arn: &str, region: &str, field: &str) -> Result<()> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() != 6
        || parts[0] != "arn"
        || parts[2] != "bedrock"
        || !parts[5].starts_with("foundation-model/")
    {
        bail!(
            "{} must be a Bedrock foundation-model ARN \
             (arn:<partition>:bedrock:<region>::foundation-model/<model-id>), got '{}'",
            field,
            arn
        );
    }
    if parts[3] != region {
        bail!(
            "{} is in region '{}' but the stack deploys to '{}'",
            field,
            parts[3],
            region
        );
    }
    Ok(())
}

/// An OpenSearch Serverless collection ARN:
/// `arn:<partition>:aoss:<region>:<account>:collection/<id>`.
fn validate_collection_arn(arn: &str) -> Result<()> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() != 6
        || parts[0] != "arn"
        || parts[2] != "aoss"
        || !parts[5].starts_with("collection/")
    {
        bail!(
            "knowledge_base.collection_arn must be an OpenSearch Serverless \
             collection ARN (arn:<partition>:aoss:<region>:<account>:collection/<id>), got '{}'",
            arn
        );
    }
    Ok(())
}

fn validate_docs_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        bail!("data_source.docs_prefix must not be empty");
    }
    if prefix.starts_with('/') {
        bail!("data_source.docs_prefix must not start with '/'");
    }
    if prefix.contains('*') {
        bail!("data_source.docs_prefix must be a plain key prefix, not a wildcard pattern");
    }
    if prefix.contains(char::is_whitespace) {
        bail!("data_source.docs_prefix must not contain whitespace");
    }
    Ok(())
}

impl Config {
    /// Minimal valid configuration for unit tests.
    #[cfg(test)]
    pub(crate) fn minimal() -> Self {
        Self {
            stack: StackConfig {
                name: default_stack_name(),
                region: "ap-southeast-2".to_string(),
            },
            knowledge_base: KnowledgeBaseConfig {
                name: default_kb_name(),
                embedding_model_arn:
                    "arn:aws:bedrock:ap-southeast-2::foundation-model/amazon.titan-embed-text-v2:0"
                        .to_string(),
                collection_import: Some("AossCollectionArn".to_string()),
                collection_arn: None,
            },
            vector_index: VectorIndexConfig::default(),
            data_source: DataSourceConfig::default(),
            bucket: BucketConfig::default(),
            server: ServerConfig::default(),
        }
    }
}
