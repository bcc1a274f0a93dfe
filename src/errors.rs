use actix_web::HttpResponse;
use thiserror::Error;

use crate::domain::errors::DomainError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidTransition(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Reconciliation(String),

    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DomainError> for AppError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::NotFound => AppError::NotFound,
            DomainError::Validation(msg) => AppError::Validation(msg),
            DomainError::InvalidTransition { from, to } => AppError::InvalidTransition(format!(
                "Invalid status transition: {} -> {}",
                from, to
            )),
            DomainError::Conflict(msg) => AppError::Conflict(msg),
            DomainError::Reconciliation(msg) => AppError::Reconciliation(msg),
            DomainError::Provider(msg) => AppError::Provider(msg),
            DomainError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl actix_web::ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::NotFound => HttpResponse::NotFound().json(serde_json::json!({
                "error": self.to_string()
            })),
            AppError::Validation(_) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": self.to_string()
            })),
            AppError::InvalidTransition(_) | AppError::Reconciliation(_) => {
                HttpResponse::UnprocessableEntity().json(serde_json::json!({
                    "error": self.to_string()
                }))
            }
            AppError::Conflict(_) => HttpResponse::Conflict().json(serde_json::json!({
                "error": self.to_string()
            })),
            AppError::Provider(_) => HttpResponse::BadGateway().json(serde_json::json!({
                "error": self.to_string()
            })),
            AppError::Internal(_) => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error"
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;

    use crate::domain::order::OrderStatus;

    #[test]
    fn not_found_returns_404() {
        assert_eq!(AppError::NotFound.error_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn validation_returns_400() {
        assert_eq!(
            AppError::Validation("bad".to_string()).error_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn invalid_transition_returns_422() {
        assert_eq!(
            AppError::InvalidTransition("no".to_string())
                .error_response()
                .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn conflict_returns_409() {
        assert_eq!(
            AppError::Conflict("raced".to_string()).error_response().status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn provider_error_returns_502() {
        assert_eq!(
            AppError::Provider("down".to_string()).error_response().status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn internal_error_returns_500_with_masked_body() {
        let err = AppError::Internal("secret detail".to_string());
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn domain_not_found_maps_to_app_not_found() {
        let app_err: AppError = DomainError::NotFound.into();
        assert!(matches!(app_err, AppError::NotFound));
    }

    #[test]
    fn domain_invalid_transition_keeps_both_states_in_message() {
        let app_err: AppError = DomainError::InvalidTransition {
            from: OrderStatus::Submitted,
            to: OrderStatus::Delivered,
        }
        .into();
        assert_eq!(
            app_err.to_string(),
            "Invalid status transition: submitted -> delivered"
        );
    }

    #[test]
    fn domain_provider_maps_to_app_provider() {
        let app_err: AppError = DomainError::Provider("timeout".to_string()).into();
        assert!(matches!(app_err, AppError::Provider(_)));
    }
}
