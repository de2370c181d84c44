use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Result as ActixResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::core::{CrawlerService, DiagnosedError};
use crate::diagnostics::{DiagnosisReport, PreviewWindow};
use crate::error::CrawlError;
use crate::template::ExtractionTemplate;

/// JSON envelope shared by every route
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<DiagnosisReport>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            code: None,
            diagnosis: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(error: &CrawlError) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(error.to_string()),
            code: Some(error.code().to_string()),
            diagnosis: None,
        }
    }

    pub fn diagnosed(failure: DiagnosedError) -> Self {
        Self {
            diagnosis: Some(failure.diagnosis),
            ..Self::failure(&failure.error)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateSelectorRequest {
    pub url: String,
    pub selector: String,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub template: ExtractionTemplate,
    pub limit: Option<usize>,
    pub page: Option<usize>,
    #[serde(alias = "pageSize")]
    pub page_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DiagnoseRequest {
    pub url: String,
    pub template: ExtractionTemplate,
    #[serde(alias = "errorContext")]
    pub error_context: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TestRequest {
    pub url: String,
    pub template: ExtractionTemplate,
}

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub url: String,
}

/// Configure API routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::scope("/crawler")
                    .route("/validate-selector", web::post().to(validate_selector))
                    .route("/preview", web::post().to(preview))
                    .route("/diagnose", web::post().to(diagnose))
                    .route("/test", web::post().to(test_template))
                    .route("/templates/{id}/execute", web::post().to(execute))
                    .route("/proxy", web::get().to(proxy)),
            )
            .route("/health", web::get().to(health_check)),
    );
}

/// HTTP status for an error escaping an operation
pub fn status_for(error: &CrawlError) -> StatusCode {
    match error {
        CrawlError::InvalidSelector { .. }
        | CrawlError::InvalidTemplate { .. }
        | CrawlError::InvalidUrl { .. } => StatusCode::BAD_REQUEST,
        CrawlError::TemplateNotFound { .. } => StatusCode::NOT_FOUND,
        e if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
        CrawlError::Network { .. } | CrawlError::HttpStatus { .. } => StatusCode::BAD_GATEWAY,
        CrawlError::RenderUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(operation: &str, error: &CrawlError) -> HttpResponse {
    error!("API: {} failed: {}", operation, error);
    HttpResponse::build(status_for(error)).json(ApiResponse::failure(error))
}

async fn validate_selector(
    service: web::Data<Arc<CrawlerService>>,
    req: web::Json<ValidateSelectorRequest>,
) -> ActixResult<HttpResponse> {
    info!("API: Validating selector '{}' on {}", req.selector, req.url);

    match service.validate_selector(&req.url, &req.selector).await {
        Ok(result) => Ok(HttpResponse::Ok().json(ApiResponse::ok(result))),
        Err(e) => Ok(error_response("validate-selector", &e)),
    }
}

async fn preview(
    service: web::Data<Arc<CrawlerService>>,
    req: web::Json<PreviewRequest>,
) -> ActixResult<HttpResponse> {
    let req = req.into_inner();
    info!("API: Previewing template {}", req.template.display_name());

    let window = PreviewWindow::from_params(req.limit, req.page, req.page_size, &service.config().preview);
    match service.preview_or_diagnose(&req.template, window).await {
        Ok(result) => Ok(HttpResponse::Ok().json(ApiResponse::ok(result))),
        Err(failure) => {
            error!("API: preview failed: {}", failure.error);
            let status = status_for(&failure.error);
            Ok(HttpResponse::build(status).json(ApiResponse::diagnosed(failure)))
        }
    }
}

async fn diagnose(
    service: web::Data<Arc<CrawlerService>>,
    req: web::Json<DiagnoseRequest>,
) -> ActixResult<HttpResponse> {
    info!("API: Diagnosing {}", req.url);

    let report = service
        .diagnose(&req.url, &req.template, req.error_context.as_deref())
        .await;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(report)))
}

async fn test_template(
    service: web::Data<Arc<CrawlerService>>,
    req: web::Json<TestRequest>,
) -> ActixResult<HttpResponse> {
    info!("API: Test run of {} on {}", req.template.display_name(), req.url);

    let outcome = service.test(&req.url, &req.template).await;
    let response = ApiResponse {
        success: outcome.success,
        message: Some(outcome.message.clone()),
        code: None,
        diagnosis: None,
        data: Some(outcome),
    };
    Ok(HttpResponse::Ok().json(response))
}

async fn execute(service: web::Data<Arc<CrawlerService>>, path: web::Path<String>) -> ActixResult<HttpResponse> {
    let template_id = path.into_inner();
    info!("API: Executing template {}", template_id);

    match service.execute(&template_id).await {
        Ok(summary) => Ok(HttpResponse::Ok().json(ApiResponse::ok(summary))),
        Err(e) => Ok(error_response("execute", &e)),
    }
}

async fn proxy(service: web::Data<Arc<CrawlerService>>, query: web::Query<ProxyQuery>) -> ActixResult<HttpResponse> {
    match service.proxy_html(&query.url).await {
        Ok(html) => Ok(HttpResponse::Ok().content_type("text/html; charset=utf-8").body(html)),
        Err(e) => Ok(error_response("proxy", &e)),
    }
}

/// Health check endpoint
async fn health_check(service: web::Data<Arc<CrawlerService>>) -> ActixResult<HttpResponse> {
    let pool = match service.fetcher().render_pool() {
        Some(pool) => Some(pool.stats().await),
        None => None,
    };
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "dynamic_rendering": pool.is_some(),
        "render_pool": pool,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
