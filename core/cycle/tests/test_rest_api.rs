mod common;

use actix_web::{test, App};

use common::{Harness, WEBHOOK_SECRET};
use tanda_cycle::rest_api::{self, WebhookSecret};

/// Invalid signatures are rejected before anything is parsed; valid but
/// unknown events are acknowledged with 200.
#[actix_rt::test]
async fn webhook_endpoint_verifies_signatures() {
    let h = Harness::new();
    let (group, _) = h.started_group(3).await;
    h.cycle.process_tick(&group.id).await.unwrap();

    let app = test::init_service(
        App::new().service(rest_api::gateway_scope(
            h.service.clone(),
            WebhookSecret(WEBHOOK_SECRET.to_vec()),
        )),
    )
    .await;

    let payment = h.payments(&group.id, 1).await.remove(0);
    let event = h
        .gateway
        .succeed_intent(payment.gateway_intent_id.as_deref().unwrap());
    let (body, signature) = h.gateway.signed_body(&event);

    // Missing signature header.
    let req = test::TestRequest::post()
        .uri("/gateway-api/v1/events")
        .set_payload(body.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // Tampered body.
    let req = test::TestRequest::post()
        .uri("/gateway-api/v1/events")
        .insert_header(("X-Gateway-Signature", signature.clone()))
        .set_payload(b"{\"tampered\":true}".to_vec())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // Genuine delivery.
    let req = test::TestRequest::post()
        .uri("/gateway-api/v1/events")
        .insert_header(("X-Gateway-Signature", signature))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    // Unknown event kinds are signed-and-acknowledged no-ops.
    let raw = br#"{"eventId":"evt_x","kind":"price_updated","createdAt":"2025-01-06T00:00:00Z"}"#;
    let signature = tanda_gateway::signature::sign(WEBHOOK_SECRET, raw);
    let req = test::TestRequest::post()
        .uri("/gateway-api/v1/events")
        .insert_header(("X-Gateway-Signature", signature))
        .set_payload(raw.to_vec())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_rt::test]
async fn admin_endpoints_report_state() {
    let h = Harness::new();
    let (group, _) = h.started_group(3).await;

    let app = test::init_service(
        App::new().service(rest_api::admin_scope(h.service.clone())),
    )
    .await;

    let req = test::TestRequest::get()
        .uri(&format!("/admin-api/v1/groups/{}", group.id))
        .to_request();
    let state: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(state["status"], "Active");
    assert_eq!(state["cycleStarted"], true);
    assert_eq!(state["futureCycles"].as_array().unwrap().len(), 3);
    assert_eq!(state["aggregates"]["contributionAmount"], "100");

    // Unknown group: 404 with a machine-readable kind.
    let req = test::TestRequest::get()
        .uri("/admin-api/v1/groups/no-such-group")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    // Double start: 409 conflict.
    let req = test::TestRequest::post()
        .uri(&format!("/admin-api/v1/groups/{}/start", group.id))
        .set_json(serde_json::json!({
            "firstCycleDate": "2025-01-06",
            "cycleFrequency": "Weekly",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    // Pause, then inspect through the list endpoint.
    let req = test::TestRequest::post()
        .uri(&format!("/admin-api/v1/groups/{}/pause", group.id))
        .set_json(serde_json::json!({ "reason": "Admin" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get()
        .uri("/admin-api/v1/groups")
        .to_request();
    let groups: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(groups.as_array().unwrap().len(), 1);
    assert_eq!(groups[0]["status"], "Paused");
    assert_eq!(groups[0]["pauseReason"], "Admin");
}

#[actix_rt::test]
async fn forensics_endpoints_expose_payments_and_log() {
    let h = Harness::new();
    let (group, _) = h.started_group(3).await;
    h.cycle.process_tick(&group.id).await.unwrap();

    let app = test::init_service(
        App::new().service(rest_api::admin_scope(h.service.clone())),
    )
    .await;

    let req = test::TestRequest::get()
        .uri(&format!("/admin-api/v1/groups/{}/payments", group.id))
        .to_request();
    let payments: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(payments.as_array().unwrap().len(), 2);
    assert_eq!(payments[0]["status"], "Pending");
    assert_eq!(payments[0]["amount"], "100");

    let req = test::TestRequest::get()
        .uri(&format!("/admin-api/v1/groups/{}/payouts", group.id))
        .to_request();
    let payouts: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(payouts.as_array().unwrap().len(), 0);

    let req = test::TestRequest::get()
        .uri(&format!("/admin-api/v1/groups/{}/log", group.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get().uri("/admin-api/v1/queue").to_request();
    let stats: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    // The start tick is still pending: we drove the processor by hand.
    assert!(stats["pending"].as_u64().unwrap() >= 1);
}
