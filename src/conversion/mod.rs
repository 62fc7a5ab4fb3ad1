//! Spreadsheet-to-PDF conversion through a hosted document API.
//!
//! The file is posted as the `document` multipart part together with an `instructions` part
//! asking for a single-part PDF build. The response body is streamed to `<stem>.pdf` next to the
//! input, and the input file is removed once the request has been attempted.

use crate::config::Config;
use crate::sessions::filename_stem;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode, multipart};
use serde_json::json;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors raised by the conversion adapter.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Reading the input or writing the PDF failed.
    #[error("Conversion I/O failed for {path}: {source}")]
    Io {
        /// File being read or written.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The conversion service could not be reached or the stream broke.
    #[error("Conversion request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The conversion service answered with a non-success status.
    #[error("Conversion service rejected the document ({status}): {body}")]
    Rejected {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Response body, as returned.
        body: String,
    },
}

/// Client for the hosted conversion endpoint.
pub struct ConversionClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl ConversionClient {
    /// Construct a client for `endpoint` authenticating with bearer `api_key`.
    pub fn new(endpoint: String, api_key: String) -> Self {
        let http = Client::builder()
            .user_agent("finfunc/convert")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            endpoint,
            api_key,
        }
    }

    /// Construct a client from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.conversion_api_url.clone(),
            config.conversion_api_key.clone(),
        )
    }

    /// Convert `input` to a PDF, returning the path of the written file.
    pub async fn convert_to_pdf(&self, input: &Path) -> Result<PathBuf, ConversionError> {
        let result = self.convert(input).await;
        if let Err(error) = tokio::fs::remove_file(input).await {
            tracing::warn!(path = %input.display(), error = %error, "Failed to remove conversion input");
        }
        result
    }

    async fn convert(&self, input: &Path) -> Result<PathBuf, ConversionError> {
        let file_name = input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = tokio::fs::read(input)
            .await
            .map_err(|source| io_error(input, source))?;

        let instructions = json!({ "parts": [{ "file": "document" }] });
        let form = multipart::Form::new()
            .part(
                "document",
                multipart::Part::bytes(bytes).file_name(file_name.clone()),
            )
            .text("instructions", instructions.to_string());

        tracing::info!(file_name = %file_name, endpoint = %self.endpoint, "Converting document to PDF");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Conversion service rejected document");
            return Err(ConversionError::Rejected { status, body });
        }

        let output = input.with_file_name(format!("{}.pdf", filename_stem(&file_name)));
        let mut file = tokio::fs::File::create(&output)
            .await
            .map_err(|source| io_error(&output, source))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?)
                .await
                .map_err(|source| io_error(&output, source))?;
        }
        file.flush()
            .await
            .map_err(|source| io_error(&output, source))?;

        tracing::debug!(output = %output.display(), "PDF written");
        Ok(output)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ConversionError {
    ConversionError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn convert_streams_pdf_and_removes_input() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/build")
                    .header("authorization", "Bearer convert-key")
                    .body_contains("name=\"document\"; filename=\"Q3.xlsx\"")
                    .body_contains("{\"parts\":[{\"file\":\"document\"}]}");
                then.status(200).body("%PDF-1.5 converted");
            })
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("Q3.xlsx");
        std::fs::write(&input, b"spreadsheet bytes").expect("write input");

        let client = ConversionClient::new(server.url("/build"), "convert-key".into());
        let output = client.convert_to_pdf(&input).await.expect("conversion");

        mock.assert();
        assert_eq!(output, dir.path().join("Q3.pdf"));
        assert_eq!(std::fs::read(&output).expect("pdf"), b"%PDF-1.5 converted");
        assert!(!input.exists());
    }

    #[tokio::test]
    async fn convert_reports_rejection_with_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/build");
                then.status(401).body("invalid token");
            })
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("budget.xlsx");
        std::fs::write(&input, b"bytes").expect("write input");

        let client = ConversionClient::new(server.url("/build"), "wrong".into());
        let error = client.convert_to_pdf(&input).await.expect_err("rejected");

        assert!(
            matches!(error, ConversionError::Rejected { status, ref body } if status == StatusCode::UNAUTHORIZED && body == "invalid token")
        );
        assert!(!dir.path().join("budget.pdf").exists());
    }
}
