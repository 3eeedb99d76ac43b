use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use parcel_market::api::rest::router;
use parcel_market::config::EngineSettings;
use parcel_market::state::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn setup() -> axum::Router {
    let state = AppState::new(EngineSettings::default(), 1024);
    router(Arc::new(state))
}

fn json_request(method: &str, uri: &str, user: Option<(Uuid, &str)>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some((id, role)) = user {
        builder = builder
            .header("x-user-id", id.to_string())
            .header("x-user-role", role);
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn as_user(method: &str, uri: &str, id: Uuid, body: Value) -> Request<Body> {
    json_request(method, uri, Some((id, "user")), body)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn package_body(requires_proof: bool) -> Value {
    json!({
        "pickup": { "lat": 37.44, "lng": -122.14, "address": "University Ave, Palo Alto" },
        "dropoff": { "lat": 37.36, "lng": -121.92, "address": "Airport Blvd, San Jose" },
        "description": "two boxes of books",
        "requires_proof": requires_proof
    })
}

async fn create_package(app: &axum::Router, sender: Uuid, requires_proof: bool) -> Value {
    let res = app
        .clone()
        .oneshot(as_user("POST", "/packages", sender, package_body(requires_proof)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await
}

async fn place_bid(app: &axum::Router, package_id: &str, courier: Uuid, price: f64) -> Value {
    let res = app
        .clone()
        .oneshot(as_user(
            "POST",
            &format!("/packages/{package_id}/bids"),
            courier,
            json!({ "proposed_price": price, "message": "on my way south" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await
}

#[tokio::test]
async fn health_returns_ok() {
    let app = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["packages"], 0);
    assert_eq!(body["bids"], 0);
    assert_eq!(body["routes"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let app = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("deadline_scan_seconds"));
}

#[tokio::test]
async fn mutating_routes_require_identity() {
    let app = setup();
    let response = app
        .oneshot(json_request("POST", "/packages", None, package_body(false)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["reason"], "unauthorized");
}

#[tokio::test]
async fn create_package_opens_it_for_bids() {
    let app = setup();
    let sender = Uuid::new_v4();
    let package = create_package(&app, sender, false).await;

    assert_eq!(package["status"], "open_for_bids");
    assert_eq!(package["sender_id"], sender.to_string());
    assert!(package["courier_id"].is_null());
    assert_eq!(package["bid_count"], 0);

    let code = package["tracking_code"].as_str().unwrap();
    let res = app
        .oneshot(get_request(&format!("/packages/track/{code}")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["id"], package["id"]);
}

#[tokio::test]
async fn out_of_range_coordinates_return_400() {
    let app = setup();
    let response = app
        .oneshot(as_user(
            "POST",
            "/packages",
            Uuid::new_v4(),
            json!({
                "pickup": { "lat": 123.0, "lng": 0.0, "address": "nowhere" },
                "dropoff": { "lat": 37.36, "lng": -121.92, "address": "San Jose" }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["reason"], "validation");
}

#[tokio::test]
async fn get_nonexistent_package_returns_404() {
    let app = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/packages/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn full_bidding_flow() {
    let app = setup();
    let sender = Uuid::new_v4();
    let c1 = Uuid::new_v4();
    let c2 = Uuid::new_v4();

    let package = create_package(&app, sender, false).await;
    let package_id = package["id"].as_str().unwrap().to_string();

    let first = place_bid(&app, &package_id, c1, 20.0).await;
    assert_eq!(first["status"], "pending");
    let second = place_bid(&app, &package_id, c2, 18.0).await;
    let second_id = second["id"].as_str().unwrap().to_string();

    let res = app
        .clone()
        .oneshot(get_request(&format!("/packages/{package_id}")))
        .await
        .unwrap();
    let open = body_json(res).await;
    assert_eq!(open["bid_count"], 2);
    assert!(open["bid_deadline"].is_string());

    let res = app
        .clone()
        .oneshot(as_user("POST", &format!("/bids/{second_id}/select"), c1, json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(res).await["reason"], "not_owner");

    let res = app
        .clone()
        .oneshot(as_user("POST", &format!("/bids/{second_id}/select"), sender, json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let selection = body_json(res).await;
    assert_eq!(selection["winner"]["status"], "selected");
    assert_eq!(selection["rejected"][0]["id"], first["id"]);
    assert_eq!(selection["package"]["status"], "bid_selected");
    assert_eq!(selection["package"]["price"], 18.0);
    assert_eq!(selection["package"]["courier_id"], c2.to_string());

    let res = app
        .clone()
        .oneshot(get_request(&format!("/packages/{package_id}/bids")))
        .await
        .unwrap();
    let bids = body_json(res).await;
    let statuses: Vec<&str> = bids
        .as_array()
        .unwrap()
        .iter()
        .map(|bid| bid["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["rejected", "selected"]);

    let res = app
        .clone()
        .oneshot(as_user(
            "POST",
            &format!("/bids/{second_id}/confirm-pickup"),
            c2,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "in_transit");

    let res = app
        .clone()
        .oneshot(as_user(
            "PATCH",
            &format!("/packages/{package_id}/status"),
            c2,
            json!({ "status": "delivered" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "delivered");

    let res = app
        .oneshot(as_user(
            "POST",
            &format!("/packages/{package_id}/cancel"),
            sender,
            json!({ "reason": "too late" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(res).await["reason"], "terminal_state");
}

#[tokio::test]
async fn bidding_on_own_package_is_a_conflict() {
    let app = setup();
    let sender = Uuid::new_v4();
    let package = create_package(&app, sender, false).await;
    let package_id = package["id"].as_str().unwrap();

    let res = app
        .oneshot(as_user(
            "POST",
            &format!("/packages/{package_id}/bids"),
            sender,
            json!({ "proposed_price": 10.0 }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(res).await["reason"], "self_bid");
}

#[tokio::test]
async fn delivery_waits_for_proof() {
    let app = setup();
    let sender = Uuid::new_v4();
    let courier = Uuid::new_v4();
    let package = create_package(&app, sender, true).await;
    let package_id = package["id"].as_str().unwrap().to_string();
    let bid = place_bid(&app, &package_id, courier, 25.0).await;
    let bid_id = bid["id"].as_str().unwrap().to_string();

    for (uri, actor) in [
        (format!("/bids/{bid_id}/select"), sender),
        (format!("/bids/{bid_id}/confirm-pickup"), courier),
    ] {
        let res = app
            .clone()
            .oneshot(as_user("POST", &uri, actor, json!({})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let deliver = || {
        as_user(
            "PATCH",
            &format!("/packages/{package_id}/status"),
            courier,
            json!({ "status": "delivered" }),
        )
    };

    let res = app.clone().oneshot(deliver()).await.unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let held = body_json(res).await;
    assert_eq!(held["outcome"], "proof_required");
    assert_eq!(held["package"]["status"], "in_transit");

    let res = app
        .clone()
        .oneshot(as_user(
            "POST",
            &format!("/packages/{package_id}/proof"),
            courier,
            json!({ "reference": "proofs/2026/signature.png" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app.oneshot(deliver()).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "delivered");
}

#[tokio::test]
async fn route_matches_include_nearby_packages() {
    let app = setup();
    let sender = Uuid::new_v4();
    let courier = Uuid::new_v4();
    let package = create_package(&app, sender, false).await;

    let res = app
        .clone()
        .oneshot(as_user(
            "POST",
            "/routes",
            courier,
            json!({
                "start": { "lat": 37.77, "lng": -122.42 },
                "end": { "lat": 37.34, "lng": -121.89 },
                "max_deviation_km": 10.0,
                "trip_date": "2026-10-20"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let route = body_json(res).await;
    assert_eq!(route["is_active"], true);
    let route_id = route["id"].as_str().unwrap();

    let res = app
        .oneshot(get_request(&format!("/routes/{route_id}/matches")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let matches = body_json(res).await;
    let list = matches.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["package"]["id"], package["id"]);
    assert!(list[0]["pickup_deviation_km"].as_f64().unwrap() < 10.0);
    assert!(list[0]["detour_km"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn deadline_scan_is_admin_only() {
    let app = setup();
    let operator = Uuid::new_v4();

    let res = app
        .clone()
        .oneshot(as_user("POST", "/deadlines/scan", operator, json!({ "dry_run": true })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = app
        .oneshot(json_request(
            "POST",
            "/deadlines/scan",
            Some((operator, "admin")),
            json!({ "dry_run": true }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report = body_json(res).await;
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["decisions"].as_array().unwrap().len(), 0);
}
