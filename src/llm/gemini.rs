//! Gemini API client with function calling
//!
//! Translates the provider-neutral transcript into Gemini `contents`,
//! exposes capability-set tools as function declarations, and maps the
//! reply back to either final text or requested tool calls.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::error::AgentError;
use crate::llm::{ChatModel, ModelReply, ToolDecl};
use crate::models::{ChatMessage, ToolCall};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

const DEFAULT_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let mut this = Self::new(api_key);
        this.base_url = base_url;
        this
    }

    fn build_request(&self, messages: &[ChatMessage], tools: &[ToolDecl]) -> GeminiRequest {
        let mut system_text = String::new();
        let mut contents = Vec::new();

        for message in messages {
            match message {
                ChatMessage::System { text } => {
                    if !system_text.is_empty() {
                        system_text.push('\n');
                    }
                    system_text.push_str(text);
                }
                ChatMessage::User { text } => contents.push(Content {
                    role: "user".to_string(),
                    parts: vec![Part::text(text.clone())],
                }),
                ChatMessage::Assistant { text } => contents.push(Content {
                    role: "model".to_string(),
                    parts: vec![Part::text(text.clone())],
                }),
                ChatMessage::ToolRequest { calls } => contents.push(Content {
                    role: "model".to_string(),
                    parts: calls
                        .iter()
                        .map(|call| Part::function_call(&call.name, call.arguments.clone()))
                        .collect(),
                }),
                ChatMessage::ToolResult { observations } => contents.push(Content {
                    role: "user".to_string(),
                    parts: observations
                        .iter()
                        .map(|obs| {
                            let response = if obs.success {
                                json!({ "result": obs.payload })
                            } else {
                                json!({ "error": obs.error })
                            };
                            Part::function_response(&obs.tool_name, response)
                        })
                        .collect(),
                }),
            }
        }

        let declarations: Vec<FunctionDeclaration> = tools
            .iter()
            .map(|decl| FunctionDeclaration {
                name: decl.name.clone(),
                description: decl.description.clone(),
                parameters: decl.parameters.clone(),
            })
            .collect();

        GeminiRequest {
            contents,
            tools: if declarations.is_empty() {
                None
            } else {
                Some(vec![GeminiTools {
                    function_declarations: declarations,
                }])
            },
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: if system_text.is_empty() {
                None
            } else {
                Some(SystemInstruction {
                    parts: vec![Part::text(system_text)],
                })
            },
        }
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolDecl]) -> Result<ModelReply> {
        if self.api_key.is_empty() {
            return Err(AgentError::ModelUnavailable(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);
        let request = self.build_request(messages, tools);

        debug!(tool_count = tools.len(), "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                AgentError::ModelUnavailable(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(AgentError::ModelUnavailable(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            AgentError::ModelResponse(format!("Gemini parse error: {}", e))
        })?;

        let candidate = gemini_response.candidates.first().ok_or_else(|| {
            AgentError::ModelResponse("No candidates in Gemini response".to_string())
        })?;

        let calls: Vec<ToolCall> = candidate
            .content
            .parts
            .iter()
            .filter_map(|part| part.function_call.as_ref())
            .map(|fc| ToolCall {
                name: fc.name.clone(),
                arguments: fc.args.clone().unwrap_or_else(|| json!({})),
            })
            .collect();

        if !calls.is_empty() {
            return Ok(ModelReply::ToolCalls(calls));
        }

        let text: String = candidate
            .content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(AgentError::ModelResponse(
                "Empty response from Gemini".to_string(),
            ));
        }

        Ok(ModelReply::Final(text))
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTools>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
}

#[derive(Debug, Serialize)]
struct GeminiTools {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "functionCall", skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(rename = "functionResponse", skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Default::default()
        }
    }

    fn function_call(name: &str, args: Value) -> Self {
        Self {
            function_call: Some(FunctionCall {
                name: name.to_string(),
                args: Some(args),
            }),
            ..Default::default()
        }
    }

    fn function_response(name: &str, response: Value) -> Self {
        Self {
            function_response: Some(FunctionResponse {
                name: name.to_string(),
                response,
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "topK")]
    top_k: i32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}
