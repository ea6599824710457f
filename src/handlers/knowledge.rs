//! Demo knowledge-base endpoints.
//!
//! These handlers hold no data of their own. They exist so the admission
//! pipeline has real routes with path parameters and JSON bodies to guard;
//! by the time a request lands here it has already been rate limited and
//! validated.

use axum::Json;
use axum::extract::Path;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::{info, instrument};

use crate::models::{CategoryResponse, CreateKnowledgeRequest, KnowledgeItem};

/// `GET /api/v1/knowledge/{item_id}`
#[instrument]
pub async fn get_item(Path(item_id): Path<String>) -> Json<KnowledgeItem> {
    Json(KnowledgeItem {
        id: item_id,
        title: "Sample item".to_string(),
        content: "Placeholder content".to_string(),
        category: None,
        tags: Vec::new(),
        created_at: Utc::now(),
    })
}

/// `GET /api/v1/categories/{slug}`
#[instrument]
pub async fn get_category(Path(slug): Path<String>) -> Json<CategoryResponse> {
    Json(CategoryResponse::from_slug(&slug))
}

/// `POST /api/v1/knowledge`
#[instrument(skip(payload))]
pub async fn create_item(
    Json(payload): Json<CreateKnowledgeRequest>,
) -> (StatusCode, Json<KnowledgeItem>) {
    let item = KnowledgeItem::create(payload);
    info!(id = %item.id, "Knowledge item accepted");
    (StatusCode::CREATED, Json(item))
}
