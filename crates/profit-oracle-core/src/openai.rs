//! HTTP client for an OpenAI-compatible Responses / Files / Containers API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::{PipelineError, ServiceError};
use crate::security::SecretValue;
use crate::service::{
    CompletionService, FileStore, FileUpload, OutputItem, RequestInput, ResponseRequest,
    SandboxArtifact, ServiceResponse, ToolGrant,
};

const CAPACITY_ERROR_CODES: [&str; 3] = [
    "rate_limit_exceeded",
    "context_length_exceeded",
    "insufficient_quota",
];

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretValue,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretValue,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let api_key = config.service_api_key()?;
        Self::new(
            config.service.base_url.clone(),
            api_key,
            config.service.timeout(),
        )
        .map_err(|err| PipelineError::InvalidConfiguration(err.to_string()))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    #[instrument(name = "service.responses", skip(self, request), fields(model = %request.model))]
    async fn create_response(
        &self,
        request: ResponseRequest,
    ) -> Result<ServiceResponse, ServiceError> {
        let body = request_body(&request);
        let response = self
            .http
            .post(self.endpoint("responses"))
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let err = classify_http_error(status, &text);
            warn!(status = status.as_u16(), error = %err, "responses call rejected");
            return Err(err);
        }

        let wire: WireResponse =
            serde_json::from_str(&text).map_err(|err| ServiceError::Decode(err.to_string()))?;
        wire.into_service_response()
    }
}

#[async_trait]
impl FileStore for OpenAiClient {
    #[instrument(
        name = "service.files.upload",
        skip(self, upload),
        fields(path = %upload.path.display())
    )]
    async fn upload(&self, upload: FileUpload) -> Result<String, ServiceError> {
        let bytes = tokio::fs::read(&upload.path)
            .await
            .map_err(|err| ServiceError::io(&upload.path, err))?;
        let filename = upload
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let mime = mime_guess::from_path(&upload.path).first_or_octet_stream();

        let part = Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime.as_ref())?;
        let mut form = Form::new()
            .text("purpose", upload.purpose.as_str())
            .part("file", part);
        if let Some(retention) = upload.expires_after {
            form = form
                .text("expires_after[anchor]", "created_at")
                .text("expires_after[seconds]", retention.as_secs().to_string());
        }

        let response = self
            .http
            .post(self.endpoint("files"))
            .bearer_auth(self.api_key.expose())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(classify_http_error(status, &text));
        }

        let uploaded: UploadedFile =
            serde_json::from_str(&text).map_err(|err| ServiceError::Decode(err.to_string()))?;
        debug!(file_id = %uploaded.id, "file uploaded");
        Ok(uploaded.id)
    }

    #[instrument(
        name = "service.containers.fetch",
        skip(self),
        fields(container = %artifact.container_id, file = %artifact.file_id)
    )]
    async fn fetch_container_file(
        &self,
        artifact: &SandboxArtifact,
    ) -> Result<Vec<u8>, ServiceError> {
        let url = self.endpoint(&format!(
            "containers/{}/files/{}/content",
            artifact.container_id, artifact.file_id
        ));
        let response = self
            .http
            .get(url)
            .bearer_auth(self.api_key.expose())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status, &text));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

fn request_body(request: &ResponseRequest) -> Value {
    let input = match &request.input {
        RequestInput::Text { text } => Value::String(text.clone()),
        RequestInput::Multimodal {
            text,
            image_file_id,
        } => json!([{
            "role": "user",
            "content": [
                { "type": "input_text", "text": text },
                { "type": "input_image", "file_id": image_file_id },
            ],
        }]),
    };

    let mut body = json!({
        "model": request.model,
        "input": input,
    });

    if let Some(instructions) = &request.instructions {
        body["instructions"] = Value::String(instructions.clone());
    }

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| match tool {
                ToolGrant::WebSearch => json!({ "type": "web_search" }),
                ToolGrant::CodeInterpreter { file_ids } => json!({
                    "type": "code_interpreter",
                    "container": { "type": "auto", "file_ids": file_ids },
                }),
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }

    if let Some(schema) = &request.output_schema {
        body["text"] = json!({
            "format": {
                "type": "json_schema",
                "name": schema.name,
                "schema": schema.schema,
                "strict": false,
            }
        });
    }

    body
}

fn classify_http_error(status: StatusCode, body: &str) -> ServiceError {
    let parsed = serde_json::from_str::<WireErrorEnvelope>(body).ok();
    let message = parsed
        .as_ref()
        .map(|envelope| envelope.error.message.clone())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| body.to_string());
    let capacity_code = parsed
        .as_ref()
        .and_then(|envelope| envelope.error.code.as_deref())
        .map(|code| CAPACITY_ERROR_CODES.contains(&code))
        .unwrap_or(false);

    if status == StatusCode::TOO_MANY_REQUESTS || capacity_code {
        ServiceError::CapacityExceeded { reason: message }
    } else {
        ServiceError::Http {
            status: status.as_u16(),
            message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireIncomplete {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Vec<WireItem>,
    #[serde(default)]
    error: Option<WireError>,
    #[serde(default)]
    incomplete_details: Option<WireIncomplete>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireItem {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        content: Vec<WireContent>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireContent {
    #[serde(rename = "output_text")]
    OutputText {
        text: String,
        #[serde(default)]
        annotations: Vec<WireAnnotation>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireAnnotation {
    #[serde(rename = "container_file_citation")]
    ContainerFile {
        container_id: String,
        file_id: String,
        filename: String,
    },
    #[serde(other)]
    Other,
}

impl WireResponse {
    fn into_service_response(self) -> Result<ServiceResponse, ServiceError> {
        match self.status.as_deref() {
            Some("incomplete") => {
                let reason = self
                    .incomplete_details
                    .and_then(|details| details.reason)
                    .unwrap_or_else(|| "response incomplete".to_string());
                return Err(ServiceError::CapacityExceeded { reason });
            }
            Some("failed") => {
                let error = self.error.unwrap_or(WireError {
                    message: "response failed".to_string(),
                    code: None,
                });
                let capacity = error
                    .code
                    .as_deref()
                    .map(|code| CAPACITY_ERROR_CODES.contains(&code))
                    .unwrap_or(false);
                return Err(if capacity {
                    ServiceError::CapacityExceeded {
                        reason: error.message,
                    }
                } else {
                    ServiceError::Http {
                        status: 200,
                        message: error.message,
                    }
                });
            }
            _ => {}
        }

        let mut items = Vec::new();
        for item in self.output {
            let WireItem::Message { content } = item else {
                continue;
            };
            for part in content {
                let WireContent::OutputText { text, annotations } = part else {
                    continue;
                };
                items.push(OutputItem::Text { text });
                for annotation in annotations {
                    if let WireAnnotation::ContainerFile {
                        container_id,
                        file_id,
                        filename,
                    } = annotation
                    {
                        items.push(OutputItem::AnnotatedFile(SandboxArtifact {
                            container_id,
                            file_id,
                            filename,
                        }));
                    }
                }
            }
        }

        Ok(ServiceResponse { id: self.id, items })
    }
}
