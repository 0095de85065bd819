use actix_cors::Cors;
use actix_web::middleware::{Condition, Logger};
use actix_web::{App, HttpServer, web};
use backend::config::{AppConfig, ModelConfig};
use backend::inference::model::{Classifier, InferenceError};
use backend::inference::preprocess::ImageNormalizer;
use backend::ledger::csv_ledger::ResultLedger;
use backend::pipeline::batch::BatchProcessor;
use backend::routes::{AppState, configure_routes};
use backend::storage::upload_store::UploadStore;
use std::env;
use std::io::{Error, ErrorKind};
use std::sync::Arc;

#[cfg(feature = "torch")]
fn load_classifier(config: &AppConfig) -> Result<Arc<dyn Classifier>, InferenceError> {
    let model = backend::inference::model::TorchClassifier::load(&config.model_path)?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "torch"))]
fn load_classifier(config: &AppConfig) -> Result<Arc<dyn Classifier>, InferenceError> {
    Err(InferenceError::Load(format!(
        "{}: server was built without the `torch` feature (rebuild with `--features torch`)",
        config.model_path.display()
    )))
}

fn startup_error(context: &str, e: impl std::fmt::Display) -> Error {
    log::error!("{}: {}", context, e);
    Error::new(ErrorKind::Other, format!("{}: {}", context, e))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    let config = AppConfig::from_env();

    let default_filter = match &config {
        Ok(config) if config.debug => "debug",
        _ => "info",
    };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let config = config.map_err(|e| startup_error("Invalid configuration", e))?;

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let model_config = match &config.model_config {
        Some(path) => {
            log::info!("Loading model config from {}", path.display());
            ModelConfig::load(path).map_err(|e| startup_error("Model config failed", e))?
        }
        None => ModelConfig::default(),
    };
    let normalizer = ImageNormalizer::from_config(&model_config)
        .map_err(|e| startup_error("Model config failed", e))?;
    log::info!("Model input shape: {:?}", normalizer.output_shape());

    let store = UploadStore::new(&config.upload_folder, config.max_upload_bytes);
    store
        .ensure_root()
        .map_err(|e| startup_error("Upload folder unavailable", e))?;
    log::info!("Storing uploads in {}", store.root().display());

    let classifier =
        load_classifier(&config).map_err(|e| startup_error("Model loading failed", e))?;

    let processor = BatchProcessor::new(store, normalizer, classifier, config.batch_policy);
    let ledger = ResultLedger::new(&config.results_csv);
    log::info!(
        "Results ledger at {} (batch policy: {:?})",
        ledger.path().display(),
        processor.policy()
    );
    let state = web::Data::new(AppState::new(processor, ledger));

    let static_dir = Some(config.static_dir.clone()).filter(|dir| dir.is_dir());
    if static_dir.is_none() {
        log::warn!(
            "Static directory {} not found; serving the API only",
            config.static_dir.display()
        );
    }

    let bind_address = config.bind_address();
    let debug = config.debug;
    log::info!("Starting server on {} (debug: {})", bind_address, debug);

    HttpServer::new(move || {
        App::new()
            .wrap(Condition::new(debug, Logger::default()))
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(state.clone())
            .configure(|cfg| configure_routes(cfg, static_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}

#[cfg(all(test, not(feature = "torch")))]
mod tests {
    use super::*;

    #[test]
    fn build_without_torch_names_the_missing_feature() {
        let err = match load_classifier(&AppConfig::default()) {
            Ok(_) => panic!("a build without torch cannot load a model"),
            Err(err) => err,
        };
        assert!(matches!(err, InferenceError::Load(_)));
        assert!(err.to_string().contains("--features torch"));
    }
}
