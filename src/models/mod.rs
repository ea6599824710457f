mod api;

pub use api::{
    CategoryResponse, CreateKnowledgeRequest, HealthResponse, KnowledgeItem, ServiceInfo,
};
