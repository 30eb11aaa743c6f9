use actix_web::web::{Data, Json, Path, Query};
use actix_web::{HttpResponse, Responder};
use std::sync::Arc;

use crate::db::model::PauseReason;
use crate::rest_api::{
    GroupStateResponse, LogEntryResponse, PathEvent, PathGroup, PauseRequest, PaymentResponse,
    PayoutResponse, QueryLimit, StartCycleRequest,
};
use crate::service::CycleService;

#[actix_web::post("/groups/{group_id}/start")]
pub(crate) async fn start_cycle(
    service: Data<Arc<CycleService>>,
    path: Path<PathGroup>,
    body: Json<StartCycleRequest>,
) -> impl Responder {
    let body = body.into_inner();
    service
        .start_cycle(
            &path.group_id,
            body.first_cycle_date,
            body.cycle_frequency,
        )
        .await
        .map(|group| HttpResponse::Ok().json(GroupStateResponse::from(group)))
}

#[actix_web::post("/groups/{group_id}/pause")]
pub(crate) async fn pause_group(
    service: Data<Arc<CycleService>>,
    path: Path<PathGroup>,
    body: Json<PauseRequest>,
) -> impl Responder {
    let reason = body.into_inner().reason.unwrap_or(PauseReason::Admin);
    service
        .pause_group(&path.group_id, reason)
        .await
        .map(|group| HttpResponse::Ok().json(GroupStateResponse::from(group)))
}

#[actix_web::post("/groups/{group_id}/retry")]
pub(crate) async fn retry_group(
    service: Data<Arc<CycleService>>,
    path: Path<PathGroup>,
) -> impl Responder {
    service
        .retry_group(&path.group_id)
        .await
        .map(|group| HttpResponse::Ok().json(GroupStateResponse::from(group)))
}

#[actix_web::get("/groups/{group_id}")]
pub(crate) async fn get_group(
    service: Data<Arc<CycleService>>,
    path: Path<PathGroup>,
) -> impl Responder {
    service
        .group(&path.group_id)
        .await
        .map(|group| HttpResponse::Ok().json(GroupStateResponse::from(group)))
}

#[actix_web::get("/groups")]
pub(crate) async fn list_groups(service: Data<Arc<CycleService>>) -> impl Responder {
    service.list_groups().await.map(|groups| {
        let states: Vec<GroupStateResponse> =
            groups.into_iter().map(GroupStateResponse::from).collect();
        HttpResponse::Ok().json(states)
    })
}

#[actix_web::get("/groups/{group_id}/payments")]
pub(crate) async fn list_payments(
    service: Data<Arc<CycleService>>,
    path: Path<PathGroup>,
) -> impl Responder {
    service.group_payments(&path.group_id).await.map(|payments| {
        let payments: Vec<PaymentResponse> =
            payments.into_iter().map(PaymentResponse::from).collect();
        HttpResponse::Ok().json(payments)
    })
}

#[actix_web::get("/groups/{group_id}/payouts")]
pub(crate) async fn list_payouts(
    service: Data<Arc<CycleService>>,
    path: Path<PathGroup>,
) -> impl Responder {
    service.group_payouts(&path.group_id).await.map(|payouts| {
        let payouts: Vec<PayoutResponse> =
            payouts.into_iter().map(PayoutResponse::from).collect();
        HttpResponse::Ok().json(payouts)
    })
}

#[actix_web::get("/groups/{group_id}/log")]
pub(crate) async fn group_log(
    service: Data<Arc<CycleService>>,
    path: Path<PathGroup>,
    query: Query<QueryLimit>,
) -> impl Responder {
    service
        .group_log(&path.group_id, query.limit)
        .await
        .map(|entries| {
            let entries: Vec<LogEntryResponse> =
                entries.into_iter().map(LogEntryResponse::from).collect();
            HttpResponse::Ok().json(entries)
        })
}

#[actix_web::get("/queue")]
pub(crate) async fn queue_stats(service: Data<Arc<CycleService>>) -> impl Responder {
    service
        .queue_stats()
        .await
        .map(|stats| HttpResponse::Ok().json(stats))
}

#[actix_web::post("/webhooks/{event_id}/replay")]
pub(crate) async fn replay_webhook(
    service: Data<Arc<CycleService>>,
    path: Path<PathEvent>,
) -> impl Responder {
    service
        .replay_webhook(&path.event_id)
        .await
        .map(|outcome| HttpResponse::Ok().json(format!("{:?}", outcome.effect)))
}
