use reqwest::{multipart, StatusCode};
use serde::Deserialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to read {path:?}: {source}")]
    ReadImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Error {status}: {body}")]
    Service { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceInfo {
    pub message: String,
    pub model_loaded: bool,
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Detection {
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionResponse {
    pub bacteria_count: usize,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "image/png",
    }
}

pub struct DetectionClient {
    client: reqwest::Client,
    base_url: String,
}

impl DetectionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn check_service(&self) -> Result<ServiceInfo, ClientError> {
        let response = self.client.get(format!("{}/", self.base_url)).send().await?;
        let info = response.error_for_status()?.json::<ServiceInfo>().await?;
        Ok(info)
    }

    #[instrument(skip(self))]
    pub async fn detect_file(&self, path: &Path) -> Result<DetectionResponse, ClientError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ClientError::ReadImage {
                path: path.to_path_buf(),
                source,
            })?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let part = multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime_for(path))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/detect/", self.base_url))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Service { status, body });
        }

        Ok(response.json::<DetectionResponse>().await?)
    }
}
