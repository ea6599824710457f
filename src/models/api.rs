use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Service banner returned by `GET /`.
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub environment: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy", or "degraded" while the shared counter store is unreachable
    pub status: String,
    /// Service version
    pub version: String,
    pub environment: String,
    /// Primary counter backend ("redis" or "memory")
    pub counter_store: String,
    /// Shared store availability; absent when running memory-only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter_store_available: Option<bool>,
    /// Whether the validation gate rejects injection findings
    pub strict_validation: bool,
    pub uptime_seconds: u64,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Request to create a knowledge item.
#[derive(Debug, Deserialize)]
pub struct CreateKnowledgeRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A knowledge item as returned by the API.
#[derive(Debug, Serialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeItem {
    /// New item with a freshly generated id.
    pub fn create(req: CreateKnowledgeRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: req.title,
            content: req.content,
            category: req.category,
            tags: req.tags,
            created_at: Utc::now(),
        }
    }
}

/// A category looked up by slug.
#[derive(Debug, Serialize)]
pub struct CategoryResponse {
    pub slug: String,
    /// Display name derived from the slug
    pub name: String,
}

impl CategoryResponse {
    pub fn from_slug(slug: &str) -> Self {
        let name = slug
            .split('-')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join(" ");

        Self {
            slug: slug.to_string(),
            name,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_defaults() {
        let json = r#"{"title": "Intro", "content": "Hello"}"#;
        let req: CreateKnowledgeRequest =
            serde_json::from_str(json).expect("Deserialization should succeed");

        assert_eq!(req.title, "Intro");
        assert!(req.category.is_none());
        assert!(req.tags.is_empty());
    }

    #[test]
    fn test_knowledge_item_gets_uuid() {
        let item = KnowledgeItem::create(CreateKnowledgeRequest {
            title: "Intro".to_string(),
            content: "Hello".to_string(),
            category: None,
            tags: vec!["rust".to_string()],
        });

        assert!(Uuid::parse_str(&item.id).is_ok());
        let json = serde_json::to_string(&item).expect("Serialization should succeed");
        assert!(!json.contains("category"));
    }

    #[test]
    fn test_category_name_from_slug() {
        assert_eq!(CategoryResponse::from_slug("machine-learning").name, "Machine Learning");
    }

    #[test]
    fn test_health_response_omits_missing_store_availability() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            version: "0.1.0".to_string(),
            environment: "development".to_string(),
            counter_store: "memory".to_string(),
            counter_store_available: None,
            strict_validation: false,
            uptime_seconds: 5,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&response).expect("Serialization should succeed");
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(!json.contains("counter_store_available"));
    }
}
