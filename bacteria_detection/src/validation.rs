use crate::config::normalize_extension;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("No file provided")]
    MissingFile,
    #[error("No filename provided")]
    MissingFilename,
    #[error("Unsupported file type: {extension}. Allowed: {allowed}")]
    UnsupportedType { extension: String, allowed: String },
}

/// Accepts uploads by filename extension, case-insensitively.
#[derive(Debug, Clone)]
pub struct FileValidator {
    allowed_extensions: Vec<String>,
}

impl FileValidator {
    pub fn new(allowed_extensions: &[String]) -> Self {
        Self {
            allowed_extensions: allowed_extensions
                .iter()
                .map(|ext| normalize_extension(ext))
                .collect(),
        }
    }

    /// Returns the lower-cased extension, leading dot included.
    pub fn validate(&self, filename: Option<&str>) -> Result<String, ValidationError> {
        let filename = match filename {
            Some(name) if !name.is_empty() => name,
            _ => return Err(ValidationError::MissingFilename),
        };

        let extension = Path::new(filename)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .filter(|ext| !ext.is_empty())
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();

        if !self.allowed_extensions.contains(&extension) {
            return Err(ValidationError::UnsupportedType {
                extension,
                allowed: self.allowed_display(),
            });
        }

        Ok(extension)
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    fn allowed_display(&self) -> String {
        let quoted: Vec<String> = self
            .allowed_extensions
            .iter()
            .map(|ext| format!("'{}'", ext))
            .collect();
        format!("{{{}}}", quoted.join(", "))
    }
}
