//! The stack declaration: a documents bucket, an execution role with a
//! prefix-scoped read grant, a Bedrock knowledge base wired to an external
//! vector collection, and an S3 data source feeding it.
//!
//! Each resource is a small descriptor that renders its own CloudFormation
//! resource and exposes the identifiers downstream resources need (ARNs,
//! Refs, GetAtts). Wiring happens by passing descriptors along, so a
//! reference to an undeclared resource cannot be expressed. [`synthesize`]
//! assembles the full template; it is pure and deterministic for a given
//! config.

use anyhow::Result;
use serde_json::{json, Value};

use crate::config::{BucketConfig, CollectionRef, Config, ParsingStrategy};
use crate::template::{get_att, import_value, join, reference, Resource, Template};

pub const BUCKET_ID: &str = "KbDocsBucket";
pub const ROLE_ID: &str = "KnowledgeBaseRole";
pub const ROLE_POLICY_ID: &str = "KnowledgeBaseRolePolicy";
pub const KNOWLEDGE_BASE_ID: &str = "KnowledgeBase";
pub const DATA_SOURCE_ID: &str = "S3DataSource";

pub const OUTPUT_BUCKET_NAME: &str = "DocsBucketName";
pub const OUTPUT_DOCS_PREFIX: &str = "DocsPrefix";
pub const OUTPUT_KNOWLEDGE_BASE_ID: &str = "KnowledgeBaseId";
pub const OUTPUT_DATA_SOURCE_ID: &str = "DataSourceId";

/// Private S3 bucket holding the documents to ingest.
///
/// Always encrypted (SSE-S3) and with every public-access vector blocked;
/// neither is configurable. The physical name is generated by the engine
/// and surfaced through the `DocsBucketName` output.
pub struct DocsBucket {
    logical_id: &'static str,
}

impl DocsBucket {
    pub fn declare(template: &mut Template, config: &BucketConfig) -> Self {
        let mut properties = json!({
            "BucketEncryption": {
                "ServerSideEncryptionConfiguration": [
                    { "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" } }
                ]
            },
            "PublicAccessBlockConfiguration": {
                "BlockPublicAcls": true,
                "BlockPublicPolicy": true,
                "IgnorePublicAcls": true,
                "RestrictPublicBuckets": true
            }
        });
        if config.versioned {
            properties["VersioningConfiguration"] = json!({ "Status": "Enabled" });
        }
        let policy = if config.retain_on_delete {
            "Retain"
        } else {
            "Delete"
        };
        let resource = Resource::new("AWS::S3::Bucket", properties).retention(policy);
        template.add_resource(BUCKET_ID, resource);
        Self {
            logical_id: BUCKET_ID,
        }
    }

    /// `Fn::GetAtt` on the bucket ARN, for grants and the data source.
    pub fn arn(&self) -> Value {
        get_att(self.logical_id, "Arn")
    }

    /// `Ref`, which for buckets resolves to the generated physical name.
    pub fn name(&self) -> Value {
        reference(self.logical_id)
    }

    /// ARN pattern covering every object under `prefix`.
    pub fn objects_under(&self, prefix: &str) -> Value {
        join("", vec![self.arn(), json!(format!("/{}*", prefix))])
    }
}

/// Execution role the knowledge base service assumes to reach the bucket.
pub struct ExecutionRole {
    logical_id: &'static str,
    policy_logical_id: &'static str,
}

impl ExecutionRole {
    /// Role assumable by the Bedrock service principal only. Permissions
    /// arrive separately via [`ExecutionRole::grant_read`].
    pub fn declare(template: &mut Template) -> Self {
        let properties = json!({
            "AssumeRolePolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [
                    {
                        "Effect": "Allow",
                        "Principal": { "Service": "bedrock.amazonaws.com" },
                        "Action": "sts:AssumeRole"
                    }
                ]
            }
        });
        template.add_resource(ROLE_ID, Resource::new("AWS::IAM::Role", properties));
        Self {
            logical_id: ROLE_ID,
            policy_logical_id: ROLE_POLICY_ID,
        }
    }

    /// Read-only grant on the bucket, scoped to objects under `prefix`.
    ///
    /// The same prefix value that scopes this grant also becomes the data
    /// source's inclusion prefix, so the role can read exactly what the
    /// ingestion service will ask for. List access needs the bucket ARN
    /// itself; object access needs the prefixed object pattern.
    pub fn grant_read(&self, template: &mut Template, bucket: &DocsBucket, prefix: &str) {
        let properties = json!({
            "PolicyName": "kb-docs-read",
            "Roles": [ reference(self.logical_id) ],
            "PolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [
                    {
                        "Effect": "Allow",
                        "Action": [ "s3:GetObject*", "s3:GetBucket*", "s3:List*" ],
                        "Resource": [ bucket.arn(), bucket.objects_under(prefix) ]
                    }
                ]
            }
        });
        template.add_resource(
            self.policy_logical_id,
            Resource::new("AWS::IAM::Policy", properties),
        );
    }

    pub fn arn(&self) -> Value {
        get_att(self.logical_id, "Arn")
    }

    /// Logical id of the grant policy. The knowledge base must order itself
    /// after this, not just after the role: a role without its policy exists
    /// but cannot read, and the engine only sees the intrinsic edge to the
    /// role.
    pub fn policy_id(&self) -> &'static str {
        self.policy_logical_id
    }
}

/// The managed knowledge base: embeddings model plus external vector store.
pub struct KnowledgeBase {
    logical_id: &'static str,
}

impl KnowledgeBase {
    pub fn declare(
        template: &mut Template,
        config: &Config,
        role: &ExecutionRole,
        collection_arn: Value,
    ) -> Self {
        let idx = &config.vector_index;
        let properties = json!({
            "Name": config.knowledge_base.name,
            "RoleArn": role.arn(),
            "KnowledgeBaseConfiguration": {
                "Type": "VECTOR",
                "VectorKnowledgeBaseConfiguration": {
                    "EmbeddingModelArn": config.knowledge_base.embedding_model_arn
                }
            },
            "StorageConfiguration": {
                "Type": "OPENSEARCH_SERVERLESS",
                "OpensearchServerlessConfiguration": {
                    "CollectionArn": collection_arn,
                    "VectorIndexName": idx.name,
                    "FieldMapping": {
                        "VectorField": idx.vector_field,
                        "TextField": idx.text_field,
                        "MetadataField": idx.metadata_field
                    }
                }
            }
        });
        let resource = Resource::new("AWS::Bedrock::KnowledgeBase", properties)
            .depends_on(role.policy_id());
        template.add_resource(KNOWLEDGE_BASE_ID, resource);
        Self {
            logical_id: KNOWLEDGE_BASE_ID,
        }
    }

    /// The service-generated knowledge base id (not the logical id).
    pub fn id(&self) -> Value {
        get_att(self.logical_id, "KnowledgeBaseId")
    }
}

/// S3 data source binding the bucket (under the docs prefix) to the
/// knowledge base.
pub struct S3DataSource {
    logical_id: &'static str,
}

impl S3DataSource {
    pub fn declare(
        template: &mut Template,
        config: &Config,
        bucket: &DocsBucket,
        knowledge_base: &KnowledgeBase,
    ) -> Self {
        let ds = &config.data_source;
        let mut parsing = json!({
            "ParsingStrategy": ds.parsing_strategy.as_str()
        });
        if ds.parsing_strategy == ParsingStrategy::BedrockFoundationModel {
            if let Some(model_arn) = &ds.parsing_model_arn {
                parsing["BedrockFoundationModelConfiguration"] =
                    json!({ "ModelArn": model_arn });
            }
        }
        let properties = json!({
            "Name": ds.name,
            "KnowledgeBaseId": knowledge_base.id(),
            "DataSourceConfiguration": {
                "Type": "S3",
                "S3Configuration": {
                    "BucketArn": bucket.arn(),
                    "InclusionPrefixes": [ ds.docs_prefix ]
                }
            },
            "VectorIngestionConfiguration": {
                "ParsingConfiguration": parsing
            },
            "DataDeletionPolicy": ds.deletion_policy.as_str()
        });
        let resource = Resource::new("AWS::Bedrock::DataSource", properties)
            .depends_on(knowledge_base.logical_id);
        template.add_resource(DATA_SOURCE_ID, resource);
        Self {
            logical_id: DATA_SOURCE_ID,
        }
    }

    pub fn id(&self) -> Value {
        get_att(self.logical_id, "DataSourceId")
    }
}

/// Evaluate the declaration against `config` and render the template.
///
/// Runs entirely locally: no calls, no credentials, no clock. The collection
/// reference is the one piece that may fail, when the config names neither
/// an import nor a literal ARN.
pub fn synthesize(config: &Config) -> Result<Template> {
    let collection_arn = match config.knowledge_base.collection_ref()? {
        CollectionRef::Import(export_name) => import_value(export_name),
        CollectionRef::Arn(arn) => json!(arn),
    };

    let mut template = Template::new(
        "Amazon Bedrock knowledge base backed by an S3 document source \
         and an OpenSearch Serverless vector collection",
    );

    let bucket = DocsBucket::declare(&mut template, &config.bucket);
    let role = ExecutionRole::declare(&mut template);
    role.grant_read(&mut template, &bucket, &config.data_source.docs_prefix);
    let knowledge_base = KnowledgeBase::declare(&mut template, config, &role, collection_arn);
    let data_source = S3DataSource::declare(&mut template, config, &bucket, &knowledge_base);

    template.add_output(
        OUTPUT_BUCKET_NAME,
        "Generated name of the documents bucket",
        bucket.name(),
    );
    template.add_output(
        OUTPUT_DOCS_PREFIX,
        "Key prefix to upload documents under",
        json!(config.data_source.docs_prefix),
    );
    template.add_output(
        OUTPUT_KNOWLEDGE_BASE_ID,
        "Id of the knowledge base",
        knowledge_base.id(),
    );
    template.add_output(
        OUTPUT_DATA_SOURCE_ID,
        "Id of the S3 data source",
        data_source.id(),
    );

    Ok(template)
}
