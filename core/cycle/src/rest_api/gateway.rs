use actix_web::web::{Bytes, Data};
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use std::sync::Arc;

use tanda_gateway::signature;
use tanda_gateway::GatewayEvent;

use crate::rest_api::{ErrorMessage, WebhookSecret};
use crate::service::CycleService;

pub(crate) const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

/// Signed provider callbacks. Invalid signature: 400. Recognized events are
/// applied; unknown kinds are acknowledged with 200 so the provider stops
/// redelivering them.
#[actix_web::post("/events")]
pub(crate) async fn post_event(
    service: Data<Arc<CycleService>>,
    secret: Data<WebhookSecret>,
    request: HttpRequest,
    body: Bytes,
) -> HttpResponse {
    let header = match request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(header) => header,
        None => {
            return HttpResponse::BadRequest()
                .json(ErrorMessage::new("Missing signature header"));
        }
    };

    if let Err(e) = signature::verify(&secret.0, &body, header) {
        log::warn!("Webhook rejected: {}", e);
        metrics::counter!("tanda.webhook.events.rejected", 1);
        return HttpResponse::BadRequest().json(ErrorMessage::new("Invalid signature"));
    }

    let event: GatewayEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            return HttpResponse::BadRequest()
                .json(ErrorMessage::new(format!("Malformed event envelope: {}", e)));
        }
    };

    match service.ingest_webhook(event).await {
        Ok(outcome) => {
            log::debug!("Webhook applied: {:?}", outcome.effect);
            HttpResponse::Ok().json("Ok")
        }
        Err(e) => e.error_response(),
    }
}
