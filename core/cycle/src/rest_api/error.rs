use actix_web::{HttpResponse, ResponseError};

use crate::db::dao::GroupDaoError;
use crate::rest_api::ErrorMessage;
use crate::service::ServiceError;
use crate::webhook::IngestError;

/// Error kinds surfaced in response bodies so callers (the operator CLI in
/// particular) can distinguish outcomes without parsing messages.
pub(crate) const KIND_NOT_FOUND: &str = "not-found";
pub(crate) const KIND_CONFLICT: &str = "conflict";
pub(crate) const KIND_INVARIANT: &str = "invariant-violation";

impl ResponseError for ServiceError {
    fn error_response(&self) -> HttpResponse {
        match self {
            ServiceError::GroupNotFound(_) | ServiceError::EventNotFound(_) => {
                HttpResponse::NotFound()
                    .json(ErrorMessage::with_kind(self.to_string(), KIND_NOT_FOUND))
            }
            ServiceError::AlreadyStarted(_) | ServiceError::NotPaused(_) => {
                HttpResponse::Conflict()
                    .json(ErrorMessage::with_kind(self.to_string(), KIND_CONFLICT))
            }
            ServiceError::NoMembers(_) => HttpResponse::UnprocessableEntity()
                .json(ErrorMessage::with_kind(self.to_string(), KIND_INVARIANT)),
            ServiceError::Group(GroupDaoError::NotFound(_)) => HttpResponse::NotFound()
                .json(ErrorMessage::with_kind(self.to_string(), KIND_NOT_FOUND)),
            ServiceError::Group(GroupDaoError::InvalidTransition(_)) => HttpResponse::Conflict()
                .json(ErrorMessage::with_kind(self.to_string(), KIND_INVARIANT)),
            ServiceError::Ingest(IngestError::Inconsistent { .. }) => {
                HttpResponse::InternalServerError()
                    .json(ErrorMessage::with_kind(self.to_string(), KIND_INVARIANT))
            }
            _ => HttpResponse::InternalServerError().json(ErrorMessage::new(self.to_string())),
        }
    }
}
