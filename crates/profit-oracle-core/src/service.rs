//! Boundary to the hosted reasoning / tool-execution service.
//!
//! The service is opaque: submit a task plus tool grants, receive free-form text
//! and optionally references to files produced inside an execution sandbox.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Handle to a file produced inside an ephemeral execution sandbox.
///
/// Valid only while the sandbox lives; resolve it within the same node invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxArtifact {
    pub container_id: String,
    pub file_id: String,
    pub filename: String,
}

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

impl SandboxArtifact {
    pub fn new(
        container_id: impl Into<String>,
        file_id: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            file_id: file_id.into(),
            filename: filename.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|candidate| ext.eq_ignore_ascii_case(candidate))
            })
            .unwrap_or(false)
    }
}

/// One item of a service response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Text { text: String },
    AnnotatedFile(SandboxArtifact),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub id: Option<String>,
    pub items: Vec<OutputItem>,
}

impl ServiceResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            items: vec![OutputItem::Text { text: text.into() }],
        }
    }

    pub fn with_item(mut self, item: OutputItem) -> Self {
        self.items.push(item);
        self
    }

    /// Concatenation of every text item, in order.
    pub fn output_text(&self) -> String {
        self.items
            .iter()
            .filter_map(|item| match item {
                OutputItem::Text { text } => Some(text.as_str()),
                OutputItem::AnnotatedFile(_) => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// First sandbox artifact referenced anywhere in the response.
    pub fn first_artifact(&self) -> Option<&SandboxArtifact> {
        self.items.iter().find_map(|item| match item {
            OutputItem::AnnotatedFile(artifact) => Some(artifact),
            OutputItem::Text { .. } => None,
        })
    }
}

/// Tool grants attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolGrant {
    WebSearch,
    CodeInterpreter { file_ids: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestInput {
    Text { text: String },
    Multimodal { text: String, image_file_id: String },
}

impl RequestInput {
    pub fn text(&self) -> &str {
        match self {
            RequestInput::Text { text } | RequestInput::Multimodal { text, .. } => text,
        }
    }
}

/// Structured-output contract for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRequest {
    pub model: String,
    pub instructions: Option<String>,
    pub input: RequestInput,
    pub tools: Vec<ToolGrant>,
    pub output_schema: Option<OutputSchema>,
}

impl ResponseRequest {
    pub fn new(model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instructions: None,
            input: RequestInput::Text { text: input.into() },
            tools: Vec::new(),
            output_schema: None,
        }
    }

    pub fn multimodal(
        model: impl Into<String>,
        text: impl Into<String>,
        image_file_id: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            instructions: None,
            input: RequestInput::Multimodal {
                text: text.into(),
                image_file_id: image_file_id.into(),
            },
            tools: Vec::new(),
            output_schema: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_tool(mut self, tool: ToolGrant) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_output_schema(
        mut self,
        name: impl Into<String>,
        schema: serde_json::Value,
    ) -> Self {
        self.output_schema = Some(OutputSchema {
            name: name.into(),
            schema,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilePurpose {
    UserData,
    Vision,
}

impl FilePurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            FilePurpose::UserData => "user_data",
            FilePurpose::Vision => "vision",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub path: PathBuf,
    pub purpose: FilePurpose,
    /// Retention window counted from upload time.
    pub expires_after: Option<Duration>,
}

impl FileUpload {
    pub fn new(path: impl Into<PathBuf>, purpose: FilePurpose) -> Self {
        Self {
            path: path.into(),
            purpose,
            expires_after: None,
        }
    }

    pub fn expiring_after(mut self, retention: Duration) -> Self {
        self.expires_after = Some(retention);
        self
    }
}

/// Completion capability of the reasoning service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn create_response(
        &self,
        request: ResponseRequest,
    ) -> Result<ServiceResponse, ServiceError>;
}

/// Managed file storage and sandbox file resolution.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Upload a local file, returning the service-side file id.
    async fn upload(&self, upload: FileUpload) -> Result<String, ServiceError>;

    /// Download the raw bytes of a sandbox-produced file.
    async fn fetch_container_file(
        &self,
        artifact: &SandboxArtifact,
    ) -> Result<Vec<u8>, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_extensions_are_recognised() {
        assert!(SandboxArtifact::new("c", "f", "chart.png").is_image());
        assert!(SandboxArtifact::new("c", "f", "chart.JPEG").is_image());
        assert!(SandboxArtifact::new("c", "f", "photo.jpg").is_image());
        assert!(!SandboxArtifact::new("c", "f", "data.txt").is_image());
        assert!(!SandboxArtifact::new("c", "f", "png").is_image());
    }

    #[test]
    fn first_artifact_wins_and_text_is_joined() {
        let response = ServiceResponse::from_text("Revenue grew. ")
            .with_item(OutputItem::AnnotatedFile(SandboxArtifact::new(
                "cntr_1", "file_1", "first.png",
            )))
            .with_item(OutputItem::Text {
                text: "See chart.".into(),
            })
            .with_item(OutputItem::AnnotatedFile(SandboxArtifact::new(
                "cntr_1", "file_2", "second.png",
            )));

        assert_eq!(response.output_text(), "Revenue grew. See chart.");
        assert_eq!(
            response.first_artifact().map(|artifact| artifact.file_id.as_str()),
            Some("file_1")
        );
    }

    #[test]
    fn text_only_response_has_no_artifact() {
        let response = ServiceResponse::from_text("plain");
        assert!(response.first_artifact().is_none());
    }
}
