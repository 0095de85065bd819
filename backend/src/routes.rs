use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{HttpResponse, ResponseError, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::ledger::csv_ledger::{LedgerError, ResultLedger};
use crate::pipeline::batch::{BatchError, BatchProcessor, UploadedInput};
use crate::storage::upload_store::StorageError;

pub const UPLOAD_FIELD: &str = "images";
const DOWNLOAD_NAME: &str = "results.csv";

/// Everything the handlers share. Batches are single-flight: `batch_gate`
/// is held from the first stored image until the ledger has been replaced,
/// even if the client that started the batch has gone away.
pub struct AppState {
    pub processor: Arc<BatchProcessor>,
    pub ledger: Arc<ResultLedger>,
    batch_gate: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(processor: BatchProcessor, ledger: ResultLedger) -> Self {
        Self {
            processor: Arc::new(processor),
            ledger: Arc::new(ledger),
            batch_gate: Arc::new(Mutex::new(())),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid upload: {0}")]
    Upload(String),
    #[error("Upload '{name}' exceeds the {limit} byte limit")]
    UploadTooLarge { name: String, limit: usize },
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Worker pool unavailable: {0}")]
    Blocking(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Upload(_) => StatusCode::BAD_REQUEST,
            ApiError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Batch(BatchError::Decode { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Batch(BatchError::Storage {
                source: StorageError::FileTooLarge { .. },
                ..
            }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Batch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Ledger(LedgerError::NotFound) => StatusCode::NO_CONTENT,
            ApiError::Ledger(_) | ApiError::Blocking(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status == StatusCode::NO_CONTENT {
            return HttpResponse::NoContent().finish();
        }
        HttpResponse::build(status).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: Option<PathBuf>) {
    cfg.service(web::resource("/predict").route(web::post().to(handle_predict)))
        .service(web::resource("/download").route(web::get().to(handle_download)));

    if let Some(static_dir) = static_dir {
        cfg.service(Files::new("/", static_dir).index_file("index.html"));
    }
}

/// Collects the `images` parts, refusing any part larger than `limit`
/// before it is fully buffered.
async fn read_uploads(
    mut payload: Multipart,
    limit: usize,
) -> Result<Vec<UploadedInput>, ApiError> {
    let mut inputs = Vec::new();

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::Upload(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            // drain parts we do not care about
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| ApiError::Upload(e.to_string()))?;
            }
            continue;
        }

        let original_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default()
            .to_string();

        let mut image_data = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| ApiError::Upload(e.to_string()))?;
            if image_data.len() + data.len() > limit {
                return Err(ApiError::UploadTooLarge {
                    name: original_name,
                    limit,
                });
            }
            image_data.extend_from_slice(&data);
        }
        inputs.push(UploadedInput::new(original_name, image_data));
    }

    Ok(inputs)
}

async fn handle_predict(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let inputs = read_uploads(payload, state.processor.max_upload_bytes())
        .await
        .inspect_err(|e| {
            error!("Rejected upload: {}", e);
        })?;
    info!("Received {} upload(s)", inputs.len());

    let gate = state.batch_gate.clone().lock_owned().await;
    let processor = state.processor.clone();
    let ledger = state.ledger.clone();

    // the guard moves into the job so a dropped request cannot release it early
    let batch = web::block(move || -> Result<_, ApiError> {
        let _gate = gate;
        let batch = processor.run(inputs)?;
        ledger.write(&batch)?;
        Ok(batch)
    })
    .await
    .map_err(|e| ApiError::Blocking(e.to_string()))?
    .inspect_err(|e| error!("Prediction request failed: {}", e))?;

    Ok(HttpResponse::Ok().json(batch.outcomes))
}

async fn handle_download(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let ledger = state.ledger.clone();
    let table = web::block(move || ledger.read())
        .await
        .map_err(|e| ApiError::Blocking(e.to_string()))?
        .inspect_err(|e| match e {
            LedgerError::NotFound => info!("Download requested before any batch was recorded"),
            other => error!("Failed to read results: {}", other),
        })?;

    Ok(HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(DOWNLOAD_NAME.to_string())],
        })
        .body(table))
}
