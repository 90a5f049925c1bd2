//! Bedrock agent runtime client.
//!
//! One operation is needed: RetrieveAndGenerate against a knowledge base,
//! which retrieves relevant chunks and asks the generation model to answer
//! grounded in them. REST/JSON with SigV4, same signer as the engine
//! client; the signing service name is `bedrock` even though the endpoint
//! is `bedrock-agent-runtime`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::aws::{self, AwsCredentials, SigningRequest};

pub struct BedrockAgentClient {
    credentials: AwsCredentials,
    region: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RagRequest<'a> {
    input: RagInput<'a>,
    retrieve_and_generate_configuration: RagConfiguration<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

#[derive(Serialize)]
struct RagInput<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RagConfiguration<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    knowledge_base_configuration: RagKnowledgeBase<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RagKnowledgeBase<'a> {
    knowledge_base_id: &'a str,
    model_arn: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagAnswer {
    pub output: RagOutput,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RagOutput {
    pub text: String,
}

impl BedrockAgentClient {
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

    /// Ask `query` against the knowledge base, generating with `model_arn`.
    /// Passing the `session_id` from a previous answer keeps conversational
    /// context on the service side.
    pub async fn retrieve_and_generate(
        &self,
        knowledge_base_id: &str,
        model_arn: &str,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<RagAnswer> {
        let request = RagRequest {
            input: RagInput { text: query },
            retrieve_and_generate_configuration: RagConfiguration {
                kind: "KNOWLEDGE_BASE",
                knowledge_base_configuration: RagKnowledgeBase {
                    knowledge_base_id,
                    model_arn,
                },
            },
            session_id,
        };
        let body = serde_json::to_vec(&request)?;

        let host = format!("bedrock-agent-runtime.{}.amazonaws.com", self.region);
        let path = "/retrieveAndGenerate";
        let headers = vec![("content-type".to_string(), "application/json".to_string())];
        let signing = SigningRequest {
            method: "POST",
            host: &host,
            path,
            query: &[],
            headers: &headers,
            payload: &body,
            region: &self.region,
            service: "bedrock",
        };
        let signed = aws::sign(&self.credentials, &signing);

        let mut http_request = self.http.post(format!("https://{}{}", host, path));
        for (name, value) in &signed {
            http_request = http_request.header(name, value);
        }
        let response = http_request
            .body(body)
            .send()
            .await
            .context("RetrieveAndGenerate request failed")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read RetrieveAndGenerate response")?;

        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| text.chars().take(300).collect());
            bail!("RetrieveAndGenerate failed (HTTP {}): {}", status, message);
        }

        serde_json::from_str(&text).context("Unexpected RetrieveAndGenerate response body")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_matches_the_wire_shape() {
        let request = RagRequest {
            input: RagInput {
                text: "What is the returns policy?",
            },
            retrieve_and_generate_configuration: RagConfiguration {
                kind: "KNOWLEDGE_BASE",
                knowledge_base_configuration: RagKnowledgeBase {
                    knowledge_base_id: "KB123456",
                    model_arn:
                        "arn:aws:bedrock:ap-southeast-2::foundation-model/anthropic.claude-3-haiku-20240307-v1:0",
                },
            },
            session_id: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "input": { "text": "What is the returns policy?" },
                "retrieveAndGenerateConfiguration": {
                    "type": "KNOWLEDGE_BASE",
                    "knowledgeBaseConfiguration": {
                        "knowledgeBaseId": "KB123456",
                        "modelArn": "arn:aws:bedrock:ap-southeast-2::foundation-model/anthropic.claude-3-haiku-20240307-v1:0"
                    }
                }
            })
        );
    }

    #[test]
    fn session_id_is_forwarded_when_present() {
        let request = RagRequest {
            input: RagInput { text: "and shipping?" },
            retrieve_and_generate_configuration: RagConfiguration {
                kind: "KNOWLEDGE_BASE",
                knowledge_base_configuration: RagKnowledgeBase {
                    knowledge_base_id: "KB123456",
                    model_arn: "arn:aws:bedrock:ap-southeast-2::foundation-model/m:0",
                },
            },
            session_id: Some("sess-42"),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["sessionId"], "sess-42");
    }

    #[test]
    fn answer_deserializes_with_and_without_session() {
        let answer: RagAnswer = serde_json::from_str(
            r#"{"output": {"text": "30 days."}, "sessionId": "sess-42", "citations": []}"#,
        )
        .unwrap();
        assert_eq!(answer.output.text, "30 days.");
        assert_eq!(answer.session_id.as_deref(), Some("sess-42"));

        let bare: RagAnswer = serde_json::from_str(r#"{"output": {"text": "30 days."}}"#).unwrap();
        assert!(bare.session_id.is_none());
    }
}
