//! CloudFormation template model.
//!
//! A [`Template`] is the rendered form of the stack declaration: resource
//! and output maps keyed by logical id, serialized to the exact JSON the
//! deployment engine consumes. Both maps are `BTreeMap`s so re-rendering
//! the same declaration is byte-identical, which keeps templates diffable
//! and lets the engine's change detection see "no changes" as no changes.

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Clone, Serialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Resource>,
    #[serde(rename = "Outputs", skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    /// Explicit ordering edges on top of what the intrinsics imply.
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "DeletionPolicy", skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
    #[serde(rename = "UpdateReplacePolicy", skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,
    #[serde(rename = "Properties")]
    pub properties: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Output {
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Value")]
    pub value: Value,
}

impl Template {
    pub fn new(description: &str) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: Some(description.to_string()),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn add_resource(&mut self, logical_id: &str, resource: Resource) {
        self.resources.insert(logical_id.to_string(), resource);
    }

    pub fn add_output(&mut self, name: &str, description: &str, value: Value) {
        self.outputs.insert(
            name.to_string(),
            Output {
                description: Some(description.to_string()),
                value,
            },
        );
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Resource {
    pub fn new(resource_type: &str, properties: Value) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
            properties,
        }
    }

    pub fn depends_on(mut self, logical_id: &str) -> Self {
        self.depends_on.push(logical_id.to_string());
        self
    }

    /// Apply the same policy to deletion and replacement, so an accidental
    /// resource replacement is no more destructive than a stack delete.
    pub fn retention(mut self, policy: &str) -> Self {
        self.deletion_policy = Some(policy.to_string());
        self.update_replace_policy = Some(policy.to_string());
        self
    }
}

/// `{"Ref": logical_id}`
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [logical_id, attribute]}`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{"Fn::ImportValue": export_name}` — resolved against another stack's
/// exports at deploy time; fails the operation if no such export exists.
pub fn import_value(export_name: &str) -> Value {
    json!({ "Fn::ImportValue": export_name })
}

/// `{"Fn::Join": [delimiter, parts]}`
pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsics_render_expected_shapes() {
        assert_eq!(reference("Bucket"), json!({"Ref": "Bucket"}));
        assert_eq!(
            get_att("Bucket", "Arn"),
            json!({"Fn::GetAtt": ["Bucket", "Arn"]})
        );
        assert_eq!(
            import_value("AossCollectionArn"),
            json!({"Fn::ImportValue": "AossCollectionArn"})
        );
        assert_eq!(
            join("", vec![get_att("Bucket", "Arn"), json!("/kb/*")]),
            json!({"Fn::Join": ["", [{"Fn::GetAtt": ["Bucket", "Arn"]}, "/kb/*"]]})
        );
    }

    #[test]
    fn empty_depends_on_is_omitted() {
        let resource = Resource::new("AWS::S3::Bucket", json!({}));
        let value = serde_json::to_value(&resource).unwrap();
        assert!(value.get("DependsOn").is_none());
        assert!(value.get("DeletionPolicy").is_none());
    }

    #[test]
    fn depends_on_renders_as_array() {
        let resource = Resource::new("AWS::Bedrock::KnowledgeBase", json!({}))
            .depends_on("KnowledgeBaseRolePolicy");
        let value = serde_json::to_value(&resource).unwrap();
        assert_eq!(value["DependsOn"], json!(["KnowledgeBaseRolePolicy"]));
    }

    #[test]
    fn retention_sets_both_policies() {
        let resource = Resource::new("AWS::S3::Bucket", json!({})).retention("Retain");
        let value = serde_json::to_value(&resource).unwrap();
        assert_eq!(value["DeletionPolicy"], "Retain");
        assert_eq!(value["UpdateReplacePolicy"], "Retain");
    }

    #[test]
    fn resources_render_in_logical_id_order() {
        let mut template = Template::new("test");
        template.add_resource("Zeta", Resource::new("AWS::S3::Bucket", json!({})));
        template.add_resource("Alpha", Resource::new("AWS::S3::Bucket", json!({})));
        let rendered = template.to_json().unwrap();
        let alpha = rendered.find("\"Alpha\"").unwrap();
        let zeta = rendered.find("\"Zeta\"").unwrap();
        assert!(alpha < zeta);
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut template = Template::new("test");
        template.add_resource("B", Resource::new("AWS::IAM::Role", json!({"A": 1})));
        template.add_resource("A", Resource::new("AWS::S3::Bucket", json!({})));
        template.add_output("Out", "an output", reference("A"));
        assert_eq!(template.to_json().unwrap(), template.to_json().unwrap());
        assert_eq!(
            template.to_json().unwrap(),
            template.clone().to_json().unwrap()
        );
    }

    #[test]
    fn outputs_section_omitted_when_empty() {
        let template = Template::new("test");
        let rendered = template.to_json().unwrap();
        assert!(!rendered.contains("Outputs"));
    }
}
