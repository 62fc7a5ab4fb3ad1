//! HTTP surface for finfunc.
//!
//! - `POST /finfunc/techexcel` – Upload an Excel file (`excel` multipart field); it is converted
//!   to PDF and returned base64-encoded. The file stem is recorded as a table name.
//! - `GET /finfunc/uploaded/techexcel_names` – Table-name stems of all Excel uploads.
//! - `POST /finfunc/upload/pdf` – Upload a PDF (`pdf` multipart field) and build an index for it.
//!   Returns the session id as `index_number`.
//! - `GET /finfunc/query-pdf/{index_number}?query=...` – Answer a question against one upload.
//! - `GET /finfunc/list-pdf` – PDF filenames and Excel names, deduplicated, with names
//!   containing `ABC` hidden.
//!
//! Upload and query failures are reported as JSON payloads with status 200; the exact payload
//! shapes are part of the contract with existing clients.

use crate::service::{FinfuncApi, ServiceError};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the HTTP router exposing the upload and query API.
pub fn create_router<S>(service: Arc<S>, max_upload_bytes: usize) -> Router
where
    S: FinfuncApi + 'static,
{
    Router::new()
        .route("/finfunc/techexcel", post(upload_excel::<S>))
        .route(
            "/finfunc/uploaded/techexcel_names",
            get(get_uploaded_excel_names::<S>),
        )
        .route("/finfunc/upload/pdf", post(upload_pdf::<S>))
        .route("/finfunc/query-pdf/:index_number", get(query_pdf::<S>))
        .route("/finfunc/list-pdf", get(list_pdf::<S>))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Response body for `POST /finfunc/techexcel`.
#[derive(Serialize)]
struct ExcelUploadResponse {
    message: String,
    pdf_base64: Option<String>,
}

async fn upload_excel<S>(
    State(service): State<Arc<S>>,
    multipart: Multipart,
) -> Result<Json<ExcelUploadResponse>, AppError>
where
    S: FinfuncApi,
{
    let (filename, bytes) = read_upload(multipart, "excel")
        .await
        .map_err(AppError::BadRequest)?;

    let upload = service
        .upload_excel(filename, bytes)
        .await
        .map_err(terminate_if_fatal)?;

    Ok(Json(ExcelUploadResponse {
        message: format!(
            "Excel file '{}' uploaded and saved under '{}'. Table '{}' created in Azure SQL Database.",
            upload.filename,
            upload.file_location.display(),
            upload.table_name
        ),
        pdf_base64: upload.pdf_base64,
    }))
}

/// Response body for `GET /finfunc/uploaded/techexcel_names`.
#[derive(Serialize)]
struct ExcelNamesResponse {
    uploaded_excels: Vec<String>,
}

async fn get_uploaded_excel_names<S>(State(service): State<Arc<S>>) -> Json<ExcelNamesResponse>
where
    S: FinfuncApi,
{
    Json(ExcelNamesResponse {
        uploaded_excels: service.excel_names(),
    })
}

/// Index a PDF upload and return `{status, index_number}` or `{"status - error": message}`.
async fn upload_pdf<S>(State(service): State<Arc<S>>, multipart: Multipart) -> Json<Value>
where
    S: FinfuncApi,
{
    let (filename, bytes) = match read_upload(multipart, "pdf").await {
        Ok(upload) => upload,
        Err(message) => return Json(json!({ "status - error": message })),
    };

    match service.upload_pdf(filename, bytes).await {
        Ok(index_number) => Json(json!({ "status": "done", "index_number": index_number })),
        Err(error) => {
            tracing::error!(error = %error, "PDF upload failed");
            Json(json!({ "status - error": error.to_string() }))
        }
    }
}

/// Query string for `GET /finfunc/query-pdf/{index_number}`.
#[derive(Deserialize)]
struct QueryParams {
    query: String,
}

async fn query_pdf<S>(
    State(service): State<Arc<S>>,
    Path(index_number): Path<String>,
    Query(params): Query<QueryParams>,
) -> Json<Value>
where
    S: FinfuncApi,
{
    let Ok(session_id) = index_number.parse::<usize>() else {
        tracing::error!(index_number = %index_number, "Error querying PDF: no such index");
        return Json(query_failed());
    };

    match service.query(session_id, params.query).await {
        Ok(response) => Json(json!({ "response": response })),
        Err(error) => {
            tracing::error!(session_id, error = %error, "Error querying PDF");
            Json(query_failed())
        }
    }
}

fn query_failed() -> Value {
    json!({ "error": "Failed to query PDF" })
}

/// Response body for `GET /finfunc/list-pdf`.
#[derive(Serialize)]
struct FilenamesResponse {
    filenames: Vec<String>,
}

async fn list_pdf<S>(State(service): State<Arc<S>>) -> Json<FilenamesResponse>
where
    S: FinfuncApi,
{
    tracing::debug!("Listing PDFs and Excel files");
    Json(FilenamesResponse {
        filenames: service.list_filenames(),
    })
}

/// Pull the uploaded file out of a multipart body.
///
/// Prefers the field called `field_name`; otherwise the first field carrying a filename.
async fn read_upload(
    mut multipart: Multipart,
    field_name: &str,
) -> Result<(String, Vec<u8>), String> {
    let mut fallback = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| format!("Failed to read multipart field: {error}"))?
    {
        let is_named = field.name() == Some(field_name);
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        if !is_named && fallback.is_some() {
            continue;
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|error| format!("Failed to read upload '{filename}': {error}"))?;
        if is_named {
            return Ok((filename, bytes.to_vec()));
        }
        fallback = Some((filename, bytes.to_vec()));
    }

    fallback.ok_or_else(|| format!("Missing file field '{field_name}'"))
}

fn terminate_if_fatal(error: ServiceError) -> AppError {
    if error.is_fatal() {
        tracing::error!(error = %error, "Document conversion failed; shutting down");
        std::process::exit(1);
    }
    AppError::Service(error)
}

enum AppError {
    BadRequest(String),
    Service(ServiceError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::Service(error) => {
                tracing::error!(error = %error, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::create_router;
    use crate::query::QueryError;
    use crate::service::{ExcelUpload, FinfuncApi, ServiceError};
    use crate::sessions::SessionError;
    use async_trait::async_trait;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "finfunc-test-boundary";

    #[derive(Default)]
    struct StubService {
        uploads: Mutex<Vec<(String, Vec<u8>)>>,
        queries: Mutex<Vec<(usize, String)>>,
        fail_pdf: bool,
    }

    #[async_trait]
    impl FinfuncApi for StubService {
        async fn upload_excel(
            &self,
            filename: String,
            bytes: Vec<u8>,
        ) -> Result<ExcelUpload, ServiceError> {
            self.uploads.lock().push((filename.clone(), bytes));
            Ok(ExcelUpload {
                table_name: filename.split('.').next().unwrap_or_default().to_string(),
                file_location: PathBuf::from("./uploads").join(&filename),
                filename,
                pdf_base64: Some("JVBERi0=".into()),
            })
        }

        fn excel_names(&self) -> Vec<String> {
            vec!["Q3".into(), "Q3".into()]
        }

        async fn upload_pdf(
            &self,
            filename: String,
            bytes: Vec<u8>,
        ) -> Result<usize, ServiceError> {
            if self.fail_pdf {
                return Err(ServiceError::Document(
                    crate::documents::DocumentError::Parse {
                        file_name: filename,
                        message: "bad xref".into(),
                    },
                ));
            }
            let mut uploads = self.uploads.lock();
            uploads.push((filename, bytes));
            Ok(uploads.len() - 1)
        }

        async fn query(&self, session_id: usize, query: String) -> Result<String, ServiceError> {
            self.queries.lock().push((session_id, query.clone()));
            if session_id == 0 {
                Ok(format!("answer to {query}"))
            } else {
                Err(QueryError::Session(SessionError::NotInitialized(session_id)).into())
            }
        }

        fn list_filenames(&self) -> Vec<String> {
            vec!["report.pdf".into(), "Q3".into()]
        }
    }

    fn router(service: Arc<StubService>) -> Router {
        create_router(service, 1024 * 1024)
    }

    fn multipart_request(uri: &str, field: &str, filename: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body).expect("json body")
    }

    #[tokio::test]
    async fn upload_pdf_returns_index_number() {
        let service = Arc::new(StubService::default());
        let response = router(service.clone())
            .oneshot(multipart_request(
                "/finfunc/upload/pdf",
                "pdf",
                "report.pdf",
                b"%PDF-1.5",
            ))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "status": "done", "index_number": 0 })
        );
        let uploads = service.uploads.lock();
        assert_eq!(uploads[0].0, "report.pdf");
        assert_eq!(uploads[0].1, b"%PDF-1.5");
    }

    #[tokio::test]
    async fn upload_pdf_reports_failures_as_status_error() {
        let service = Arc::new(StubService {
            fail_pdf: true,
            ..Default::default()
        });
        let response = router(service)
            .oneshot(multipart_request(
                "/finfunc/upload/pdf",
                "pdf",
                "broken.pdf",
                b"nope",
            ))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let message = body["status - error"].as_str().expect("error message");
        assert!(message.contains("broken.pdf"));
    }

    #[tokio::test]
    async fn upload_excel_builds_message_and_base64() {
        let service = Arc::new(StubService::default());
        let response = router(service.clone())
            .oneshot(multipart_request(
                "/finfunc/techexcel",
                "excel",
                "Q3.xlsx",
                b"cells",
            ))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["pdf_base64"], "JVBERi0=");
        assert_eq!(
            body["message"],
            "Excel file 'Q3.xlsx' uploaded and saved under './uploads/Q3.xlsx'. Table 'Q3' created in Azure SQL Database."
        );
    }

    #[tokio::test]
    async fn upload_excel_without_file_is_bad_request() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/finfunc/techexcel")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(format!("--{BOUNDARY}--\r\n")))
            .expect("request");

        let response = router(Arc::new(StubService::default()))
            .oneshot(request)
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn query_pdf_returns_response() {
        let service = Arc::new(StubService::default());
        let response = router(service.clone())
            .oneshot(
                Request::builder()
                    .uri("/finfunc/query-pdf/0?query=give%20me%20a%20summary")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(
            json_body(response).await,
            json!({ "response": "answer to give me a summary" })
        );
        assert_eq!(
            service.queries.lock().as_slice(),
            &[(0, "give me a summary".to_string())]
        );
    }

    #[tokio::test]
    async fn query_pdf_maps_errors_to_generic_payload() {
        let response = router(Arc::new(StubService::default()))
            .oneshot(
                Request::builder()
                    .uri("/finfunc/query-pdf/9?query=hello")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "error": "Failed to query PDF" })
        );
    }

    #[tokio::test]
    async fn query_pdf_out_of_range_ids_get_error_payload() {
        let service = Arc::new(StubService::default());
        let app = router(service.clone());

        for uri in [
            "/finfunc/query-pdf/-1?query=hello",
            "/finfunc/query-pdf/99999999999999999999?query=hello",
        ] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
                .await
                .expect("router response");

            assert_eq!(response.status(), StatusCode::OK, "{uri}");
            assert_eq!(
                json_body(response).await,
                json!({ "error": "Failed to query PDF" }),
                "{uri}"
            );
        }
        assert!(service.queries.lock().is_empty());
    }

    #[tokio::test]
    async fn listing_endpoints_return_their_slices() {
        let app = router(Arc::new(StubService::default()));

        let names = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/finfunc/uploaded/techexcel_names")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(
            json_body(names).await,
            json!({ "uploaded_excels": ["Q3", "Q3"] })
        );

        let listing = app
            .oneshot(
                Request::builder()
                    .uri("/finfunc/list-pdf")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(
            json_body(listing).await,
            json!({ "filenames": ["report.pdf", "Q3"] })
        );
    }
}
