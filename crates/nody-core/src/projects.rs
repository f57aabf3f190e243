//! Project listing and creation with graceful degradation.

use crate::backend::{Backend, BackendError};
use crate::records::ProjectSummary;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Detail used when the backend gave no usable error message.
pub const GENERIC_CREATE_ERROR: &str = "Failed to create project";

/// A backend reply forwarded to the caller with its status code.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectResponse {
    pub status: u16,
    pub body: Value,
}

impl ProjectResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// List projects; any failure degrades to an empty list.
pub async fn list_projects<B: Backend + ?Sized>(backend: &B) -> Vec<ProjectSummary> {
    match backend.projects().await {
        Ok(projects) => projects,
        Err(e) => {
            warn!("Failed to list projects: {}", e);
            Vec::new()
        }
    }
}

/// Create a project and translate failures into a JSON error payload.
///
/// Status errors keep the backend's status code and detail message; anything
/// else is reported as a 500 with a generic message.
pub async fn create_project<B: Backend + ?Sized>(
    backend: &B,
    name: &str,
    body: &Value,
) -> ProjectResponse {
    match backend.create_project(name, body).await {
        Ok(reply) => {
            info!("Created project {}", name);
            ProjectResponse {
                status: 200,
                body: reply,
            }
        }
        Err(BackendError::Status { status, detail }) => {
            warn!("Backend rejected project {}: {} ({})", name, detail, status);
            let detail = if detail.trim().is_empty() {
                GENERIC_CREATE_ERROR.to_string()
            } else {
                detail
            };
            ProjectResponse {
                status,
                body: json!({ "error": detail }),
            }
        }
        Err(e) => {
            warn!("Failed to create project {}: {}", name, e);
            ProjectResponse {
                status: 500,
                body: json!({ "error": GENERIC_CREATE_ERROR }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, Resource};

    #[tokio::test]
    async fn test_list_projects_degrades_to_empty() {
        let backend = InMemoryBackend::new();
        backend.set_projects(vec![ProjectSummary {
            name: "demo".into(),
            path: None,
        }]);
        assert_eq!(list_projects(&backend).await.len(), 1);

        backend.fail(Resource::Projects);
        assert!(list_projects(&backend).await.is_empty());
    }

    #[tokio::test]
    async fn test_create_project_forwards_backend_detail() {
        let backend = InMemoryBackend::new();
        let body = json!({ "description": "todo app" });

        let ok = create_project(&backend, "todo", &body).await;
        assert!(ok.is_success());
        assert_eq!(ok.body["project"], "todo");

        let dup = create_project(&backend, "todo", &body).await;
        assert_eq!(dup.status, 400);
        assert_eq!(dup.body["error"], "Project 'todo' already exists");
    }

    #[tokio::test]
    async fn test_create_project_transport_failure_is_generic() {
        let backend = InMemoryBackend::new();
        backend.fail(Resource::Projects);

        let response = create_project(&backend, "todo", &json!({})).await;
        assert_eq!(response.status, 500);
        assert_eq!(response.body, json!({ "error": GENERIC_CREATE_ERROR }));
    }
}
