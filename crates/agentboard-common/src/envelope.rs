use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseMeta {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Success envelope: `{ success, data, meta }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default = "default_true")]
    pub success: bool,
    pub data: T,
    #[serde(default)]
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    #[serde(default = "default_true")]
    pub success: bool,
    pub data: Vec<T>,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default)]
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<Vec<FieldError>>,
}

/// Error envelope: `{ success: false, error: { code, message, details? } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorEnvelope {
    #[serde(default)]
    pub success: bool,
    pub error: ApiErrorBody,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_parses_with_meta() {
        let json = r#"{"success":true,"data":[1,2],"meta":{"timestamp":"2024-01-01T00:00:00Z"}}"#;
        let resp: ApiResponse<Vec<u8>> = serde_json::from_str(json).unwrap();
        assert!(resp.success);
        assert_eq!(resp.data, vec![1, 2]);
        assert!(resp.meta.timestamp.is_some());
    }

    #[test]
    fn test_error_envelope_with_details() {
        let json = r#"{
            "success": false,
            "error": {
                "code": "VALIDATION_ERROR",
                "message": "Invalid input",
                "details": [{"field": "title", "message": "Title is required"}]
            },
            "meta": {"timestamp": "2024-01-01T00:00:00Z"}
        }"#;
        let env: ApiErrorEnvelope = serde_json::from_str(json).unwrap();
        assert!(!env.success);
        assert_eq!(env.error.code, "VALIDATION_ERROR");
        let details = env.error.details.unwrap();
        assert_eq!(details[0].field, "title");
    }

    #[test]
    fn test_paginated_defaults_pagination() {
        let json = r#"{"data":["a"]}"#;
        let resp: PaginatedResponse<String> = serde_json::from_str(json).unwrap();
        assert!(resp.success);
        assert_eq!(resp.pagination.page, 0);
    }
}
