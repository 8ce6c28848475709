// src/form_document.rs
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::form_fields::{apply_fill_data, AcroForm, FormError, FormFillData, FormTemplate};

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("JSON processing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Form(#[from] FormError),
}

// Helper to create context-aware IO errors
fn io_context<E: Into<std::io::Error>, S: Into<String>>(source: E, context: S) -> DocumentError {
    DocumentError::Io {
        source: source.into(),
        context: context.into(),
    }
}

/// Produces the filled notification document for one deal.
#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    async fn fill_document(
        &self,
        document_name: &str,
        data: &FormFillData,
    ) -> Result<Vec<u8>, DocumentError>;
}

pub async fn load_template(path: &Path) -> Result<FormTemplate, DocumentError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        io_context(e, format!("Failed to read form template {}", path.display()))
    })?;
    let template: FormTemplate = serde_json::from_str(&contents)?;
    debug!(
        "Loaded form template '{}' with {} fields",
        template.name,
        template.fields.len()
    );
    Ok(template)
}

/// Fills the JSON form template and stores the result under `output_dir`.
#[derive(Debug, Clone)]
pub struct TemplateDocumentGenerator {
    template_path: PathBuf,
    output_dir: PathBuf,
}

impl TemplateDocumentGenerator {
    pub fn new(template_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn output_path(&self, document_name: &str) -> PathBuf {
        self.output_dir.join(format!("{}.json", document_name))
    }
}

#[async_trait]
impl DocumentGenerator for TemplateDocumentGenerator {
    async fn fill_document(
        &self,
        document_name: &str,
        data: &FormFillData,
    ) -> Result<Vec<u8>, DocumentError> {
        let template = load_template(&self.template_path).await?;
        let mut form = AcroForm::from_template(&template);
        apply_fill_data(&mut form, data)?;
        let bytes = form.to_bytes()?;

        tokio::fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            io_context(
                e,
                format!("Failed to create output directory {}", self.output_dir.display()),
            )
        })?;
        let path = self.output_path(document_name);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| io_context(e, format!("Failed to write document {}", path.display())))?;

        info!(
            "Generated document {} ({} fields filled)",
            path.display(),
            form.filled_count()
        );
        Ok(bytes)
    }
}
