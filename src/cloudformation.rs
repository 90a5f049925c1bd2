//! CloudFormation deployment engine client.
//!
//! Speaks the Query API directly: form-encoded POSTs signed with SigV4,
//! XML answers picked apart with plain tag scanning. The responses used
//! here are shallow and fixed-shape, so a full XML parser would buy
//! nothing. [`StackEngine`] is the seam the deploy and destroy drivers
//! run against; tests script it, production code uses
//! [`CloudFormationClient`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

use crate::aws::{self, AwsCredentials, SigningRequest};

pub const API_VERSION: &str = "2010-05-15";

/// One stack as reported by DescribeStacks.
#[derive(Debug, Clone)]
pub struct StackDescription {
    pub stack_id: String,
    pub name: String,
    pub status: String,
    pub status_reason: Option<String>,
    pub outputs: Vec<StackOutput>,
}

impl StackDescription {
    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|o| o.key == key)
            .map(|o| o.value.as_str())
    }

    /// Whether the stack is between operations (no *_IN_PROGRESS suffix).
    pub fn is_settled(&self) -> bool {
        !self.status.ends_with("_IN_PROGRESS")
    }
}

#[derive(Debug, Clone)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
}

/// One resource-level event from DescribeStackEvents.
#[derive(Debug, Clone)]
pub struct StackEvent {
    pub event_id: String,
    /// RFC 3339 as reported; kept as text since it is only displayed.
    pub timestamp: String,
    pub logical_id: String,
    pub resource_type: String,
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Started,
    /// The submitted template and parameters match what is deployed; the
    /// engine refuses the update and nothing changes.
    NoChanges,
}

/// The five engine calls the lifecycle commands need.
#[async_trait]
pub trait StackEngine: Send + Sync {
    /// `None` when no stack with that name exists (a deleted stack counts
    /// as missing).
    async fn describe_stack(&self, name: &str) -> Result<Option<StackDescription>>;
    /// Begins creation and returns the stack id. The call returning is not
    /// completion; poll [`StackEngine::describe_stack`] for that.
    async fn create_stack(&self, name: &str, template_body: &str) -> Result<String>;
    async fn update_stack(&self, name: &str, template_body: &str) -> Result<UpdateOutcome>;
    async fn delete_stack(&self, name: &str) -> Result<()>;
    /// Resource events, newest first, as the engine reports them.
    async fn stack_events(&self, name: &str) -> Result<Vec<StackEvent>>;
}

/// Error envelope of a failed Query API call.
#[derive(Debug)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for ApiError {}

pub fn as_api_error(err: &anyhow::Error) -> Option<&ApiError> {
    err.downcast_ref::<ApiError>()
}

fn is_stack_missing(err: &ApiError) -> bool {
    err.code == "ValidationError" && err.message.contains("does not exist")
}

fn is_no_updates(err: &ApiError) -> bool {
    err.code == "ValidationError" && err.message.contains("No updates are to be performed")
}

pub struct CloudFormationClient {
    credentials: AwsCredentials,
    region: String,
    http: reqwest::Client,
}

impl CloudFormationClient {
    pub fn new(credentials: AwsCredentials, region: &str) -> Self {
        Self {
            credentials,
            region: region.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env(region: &str) -> Result<Self> {
        Ok(Self::new(AwsCredentials::from_env()?, region))
    }

    fn host(&self) -> String {
        format!("cloudformation.{}.amazonaws.com", self.region)
    }

    async fn call(&self, action: &str, params: &[(String, String)]) -> Result<String> {
        let mut form: Vec<(String, String)> = vec![
            ("Action".to_string(), action.to_string()),
            ("Version".to_string(), API_VERSION.to_string()),
        ];
        form.extend_from_slice(params);
        let body = encode_form(&form);

        let host = self.host();
        let headers = vec![(
            "content-type".to_string(),
            "application/x-www-form-urlencoded; charset=utf-8".to_string(),
        )];
        let request = SigningRequest {
            method: "POST",
            host: &host,
            path: "/",
            query: &[],
            headers: &headers,
            payload: body.as_bytes(),
            region: &self.region,
            service: "cloudformation",
        };
        let signed = aws::sign(&self.credentials, &request);

        let mut http_request = self.http.post(format!("https://{}/", host));
        for (name, value) in &signed {
            http_request = http_request.header(name, value);
        }
        let response = http_request
            .body(body)
            .send()
            .await
            .with_context(|| format!("CloudFormation {} request failed", action))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read CloudFormation {} response", action))?;

        if !status.is_success() {
            let err = parse_error(&text).unwrap_or_else(|| ApiError {
                code: format!("HTTP {}", status.as_u16()),
                message: text.chars().take(300).collect(),
            });
            return Err(anyhow::Error::new(err)
                .context(format!("CloudFormation {} failed", action)));
        }
        Ok(text)
    }
}

fn param(name: &str, value: &str) -> (String, String) {
    (name.to_string(), value.to_string())
}

fn request_token() -> String {
    format!("kbstack-{}", Uuid::new_v4())
}

#[async_trait]
impl StackEngine for CloudFormationClient {
    async fn describe_stack(&self, name: &str) -> Result<Option<StackDescription>> {
        match self
            .call("DescribeStacks", &[param("StackName", name)])
            .await
        {
            Ok(xml) => {
                let description = parse_stack_description(&xml).with_context(|| {
                    format!("Unexpected DescribeStacks response for stack '{}'", name)
                })?;
                Ok(Some(description))
            }
            Err(err) => match as_api_error(&err) {
                Some(api) if is_stack_missing(api) => Ok(None),
                _ => Err(err),
            },
        }
    }

    async fn create_stack(&self, name: &str, template_body: &str) -> Result<String> {
        let xml = self
            .call(
                "CreateStack",
                &[
                    param("StackName", name),
                    param("TemplateBody", template_body),
                    // The template declares an IAM role and policy.
                    param("Capabilities.member.1", "CAPABILITY_IAM"),
                    param("ClientRequestToken", &request_token()),
                ],
            )
            .await?;
        extract_xml_value(&xml, "StackId").context("CreateStack response had no <StackId>")
    }

    async fn update_stack(&self, name: &str, template_body: &str) -> Result<UpdateOutcome> {
        let result = self
            .call(
                "UpdateStack",
                &[
                    param("StackName", name),
                    param("TemplateBody", template_body),
                    param("Capabilities.member.1", "CAPABILITY_IAM"),
                    param("ClientRequestToken", &request_token()),
                ],
            )
            .await;
        match result {
            Ok(_) => Ok(UpdateOutcome::Started),
            Err(err) => match as_api_error(&err) {
                Some(api) if is_no_updates(api) => Ok(UpdateOutcome::NoChanges),
                _ => Err(err),
            },
        }
    }

    async fn delete_stack(&self, name: &str) -> Result<()> {
        self.call(
            "DeleteStack",
            &[
                param("StackName", name),
                param("ClientRequestToken", &request_token()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn stack_events(&self, name: &str) -> Result<Vec<StackEvent>> {
        match self
            .call("DescribeStackEvents", &[param("StackName", name)])
            .await
        {
            Ok(xml) => Ok(parse_stack_events(&xml)),
            // The stack can disappear mid-poll during a delete.
            Err(err) => match as_api_error(&err) {
                Some(api) if is_stack_missing(api) => Ok(Vec::new()),
                _ => Err(err),
            },
        }
    }
}

fn encode_form(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", aws::uri_encode(k), aws::uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Text of the first `<tag>...</tag>`, entity-unescaped. No attribute or
/// namespace handling; the Query API emits neither on value tags.
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    block(xml, tag).map(xml_unescape)
}

fn block<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = start + xml[start..].find(&close)?;
    Some(&xml[start..end])
}

/// The `<member>` blocks of a list element, in document order. Callers pass
/// the enclosing list block so nested lists cannot bleed in.
fn members(xml: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<member>") {
        let after = &rest[start + "<member>".len()..];
        match after.find("</member>") {
            Some(end) => {
                found.push(&after[..end]);
                rest = &after[end + "</member>".len()..];
            }
            None => break,
        }
    }
    found
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn parse_stack_description(xml: &str) -> Result<StackDescription> {
    let stack_id = extract_xml_value(xml, "StackId").context("missing <StackId>")?;
    let name = extract_xml_value(xml, "StackName").context("missing <StackName>")?;
    let status = extract_xml_value(xml, "StackStatus").context("missing <StackStatus>")?;
    let status_reason = extract_xml_value(xml, "StackStatusReason");
    let outputs = match block(xml, "Outputs") {
        Some(outputs_xml) => members(outputs_xml)
            .into_iter()
            .filter_map(|member| {
                Some(StackOutput {
                    key: extract_xml_value(member, "OutputKey")?,
                    value: extract_xml_value(member, "OutputValue")?,
                })
            })
            .collect(),
        None => Vec::new(),
    };
    Ok(StackDescription {
        stack_id,
        name,
        status,
        status_reason,
        outputs,
    })
}

fn parse_stack_events(xml: &str) -> Vec<StackEvent> {
    let events_xml = match block(xml, "StackEvents") {
        Some(inner) => inner,
        None => return Vec::new(),
    };
    members(events_xml)
        .into_iter()
        .filter_map(|member| {
            Some(StackEvent {
                event_id: extract_xml_value(member, "EventId")?,
                timestamp: extract_xml_value(member, "Timestamp")?,
                logical_id: extract_xml_value(member, "LogicalResourceId")?,
                resource_type: extract_xml_value(member, "ResourceType").unwrap_or_default(),
                status: extract_xml_value(member, "ResourceStatus")?,
                reason: extract_xml_value(member, "ResourceStatusReason"),
            })
        })
        .collect()
}

fn parse_error(xml: &str) -> Option<ApiError> {
    let error_block = block(xml, "Error")?;
    Some(ApiError {
        code: extract_xml_value(error_block, "Code")?,
        message: extract_xml_value(error_block, "Message").unwrap_or_default(),
    })
}
