//! Messenger webhook HTTP surface
//!
//! - `GET /webhook`: subscription handshake
//! - `POST /webhook`: event delivery, acknowledged before any processing
//! - `GET /health`

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::model::{InboundAttachment, InboundEvent, Postback, Referral};
use crate::pipeline::Pipeline;

pub const EVENT_RECEIVED: &str = "EVENT_RECEIVED";

pub struct WebhookState {
    pub pipeline: Arc<Pipeline>,
    pub verify_token: String,
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhook", get(verify).post(receive))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn verify(
    State(state): State<Arc<WebhookState>>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let (Some(mode), Some(token), Some(challenge)) =
        (params.mode, params.verify_token, params.challenge)
    else {
        return (StatusCode::BAD_REQUEST, "Missing parameters").into_response();
    };

    if mode == "subscribe" && token == state.verify_token {
        info!("✅ Webhook verified");
        (StatusCode::OK, challenge).into_response()
    } else {
        warn!("Webhook verification failed (mode={})", mode);
        (StatusCode::FORBIDDEN, "Forbidden").into_response()
    }
}

async fn receive(State(state): State<Arc<WebhookState>>, body: String) -> Response {
    let payload: serde_json::Value = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to parse webhook body: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Invalid payload").into_response();
        }
    };

    if payload["object"].as_str() != Some("page") {
        debug!("Ignoring webhook for object {}", payload["object"]);
        return StatusCode::NOT_FOUND.into_response();
    }

    let events = extract_events(&payload);
    debug!("Webhook delivery with {} event(s)", events.len());
    for event in events {
        let pipeline = state.pipeline.clone();
        state.pipeline.spawner().spawn(
            "webhook_event",
            Box::pin(async move {
                pipeline.handle_event(event).await;
                anyhow::Ok(())
            }),
        );
    }

    (StatusCode::OK, EVENT_RECEIVED).into_response()
}

/// Messaging events of a page delivery, in order. Items that are not
/// sender/recipient messaging events (optins, reads, ...) are skipped.
pub fn extract_events(payload: &serde_json::Value) -> Vec<InboundEvent> {
    let Some(entries) = payload["entry"].as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| entry["messaging"].as_array())
        .flatten()
        .filter_map(
            |item| match serde_json::from_value::<MessagingEvent>(item.clone()) {
                Ok(event) => Some(InboundEvent::from(event)),
                Err(e) => {
                    warn!("Skipping unsupported messaging item: {}", e);
                    None
                }
            },
        )
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct Party {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagingEvent {
    pub sender: Party,
    pub recipient: Party,
    pub timestamp: Option<i64>,
    pub message: Option<WireMessage>,
    pub postback: Option<WirePostback>,
    pub referral: Option<WireReferral>,
}

#[derive(Debug, Deserialize)]
pub struct WireMessage {
    pub mid: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub is_echo: bool,
    pub app_id: Option<u64>,
    #[serde(default)]
    pub attachments: Vec<WireAttachment>,
}

#[derive(Debug, Deserialize)]
pub struct WireAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Option<WireAttachmentPayload>,
}

#[derive(Debug, Deserialize)]
pub struct WireAttachmentPayload {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WirePostback {
    pub payload: String,
    pub title: Option<String>,
    pub referral: Option<WireReferral>,
}

#[derive(Debug, Deserialize)]
pub struct WireReferral {
    #[serde(rename = "ref")]
    pub ref_param: Option<String>,
    pub source: Option<String>,
    pub ad_id: Option<String>,
}

impl From<WireReferral> for Referral {
    fn from(r: WireReferral) -> Self {
        Referral {
            ref_param: r.ref_param,
            source: r.source,
            ad_id: r.ad_id,
        }
    }
}

impl From<MessagingEvent> for InboundEvent {
    fn from(event: MessagingEvent) -> Self {
        let is_echo = event.message.as_ref().is_some_and(|m| m.is_echo);
        // Echoes are sent by the page, so the user is the recipient
        let (sender_id, page_id) = if is_echo {
            (event.recipient.id, event.sender.id)
        } else {
            (event.sender.id, event.recipient.id)
        };

        // Only message ids take part in dedup; postbacks are always handled
        let postback = event.postback.map(|p| Postback {
            payload: p.payload,
            title: p.title,
            referral: p.referral.map(Referral::from),
        });

        let mut inbound = InboundEvent {
            page_id,
            sender_id,
            postback,
            referral: event.referral.map(Referral::from),
            is_echo,
            timestamp: event.timestamp,
            ..Default::default()
        };

        if let Some(message) = event.message {
            inbound.message_id = message.mid;
            inbound.text = message.text;
            inbound.app_id = message.app_id;
            inbound.attachments = message
                .attachments
                .into_iter()
                .map(|a| InboundAttachment {
                    kind: a.kind,
                    url: a.payload.and_then(|p| p.url),
                })
                .collect();
        }
        inbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineSettings;
    use crate::testing::{test_pipeline, FixedClassifier, TestPipeline};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> (Router, TestPipeline) {
        let h = test_pipeline(PipelineSettings::default(), FixedClassifier::failing());
        let state = Arc::new(WebhookState {
            pipeline: h.pipeline.clone(),
            verify_token: "s3cret".to_string(),
        });
        (router(state), h)
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_verification_handshake() {
        let (app, _) = app();

        let ok = app
            .clone()
            .oneshot(get(
                "/webhook?hub.mode=subscribe&hub.verify_token=s3cret&hub.challenge=12345",
            ))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(body_text(ok).await, "12345");

        let wrong = app
            .clone()
            .oneshot(get(
                "/webhook?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=12345",
            ))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::FORBIDDEN);

        let missing = app
            .oneshot(get("/webhook?hub.mode=subscribe&hub.verify_token=s3cret"))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn test_bad_bodies() {
        let (app, _) = app();

        let malformed = app.clone().oneshot(post("{not json")).await.unwrap();
        assert_eq!(malformed.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let other = app
            .clone()
            .oneshot(post(r#"{"object":"instagram","entry":[]}"#))
            .await
            .unwrap();
        assert_eq!(other.status(), StatusCode::NOT_FOUND);

        // Well-formed JSON without an object is not a page delivery
        let no_object = app.clone().oneshot(post(r#"{"entry":[]}"#)).await.unwrap();
        assert_eq!(no_object.status(), StatusCode::NOT_FOUND);

        let not_an_object = app.oneshot(post("[1, 2, 3]")).await.unwrap();
        assert_eq!(not_an_object.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unsupported_items_do_not_reject_delivery() {
        let (app, h) = app();
        let body = r#"{
            "object": "page",
            "entry": [
                {"id": "page-1", "messaging": [
                    {"recipient": {"id": "page-1"}, "timestamp": 1700000000000,
                     "optin": {"ref": "newsletter", "user_ref": "u-ref-1"}},
                    {"sender": {"id": "user-1"}, "recipient": {"id": "page-1"},
                     "message": {"mid": "m.1", "text": "hello"}}
                ]},
                {"id": "page-1", "changes": [{"field": "feed"}]}
            ]
        }"#;

        let response = app.oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.queue.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_acknowledged_then_processed() {
        let (app, h) = app();
        let body = r#"{
            "object": "page",
            "entry": [{
                "id": "page-1",
                "time": 1700000000000,
                "messaging": [{
                    "sender": {"id": "user-1"},
                    "recipient": {"id": "page-1"},
                    "timestamp": 1700000000000,
                    "message": {"mid": "m.1", "text": "hello there"}
                }]
            }]
        }"#;

        let response = app.oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, EVENT_RECEIVED);

        // Acknowledged before the event job has run
        assert_eq!(h.queue.pending(), 1);
        assert!(h.generator.calls().is_empty());

        h.queue.run_all().await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        let calls = h.generator.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].text, "hello there");
        assert_eq!(calls[0].sender_id, "user-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_postback_is_handled_each_time() {
        let (app, h) = app();
        let gcash = h.catalog.payment_methods[0].id;
        let body = format!(
            r#"{{"object": "page", "entry": [{{"messaging": [{{
                "sender": {{"id": "user-1"}}, "recipient": {{"id": "page-1"}},
                "postback": {{"mid": "m.pb.1", "title": "Pay here", "payload": "PAY_{}"}}
            }}]}}]}}"#,
            gcash
        );

        for _ in 0..2 {
            let response = app.clone().oneshot(post(&body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        h.queue.run_all().await;

        let details: Vec<String> = h
            .messenger
            .texts()
            .into_iter()
            .filter(|t| t.contains("GCash"))
            .collect();
        assert_eq!(details.len(), 2);
    }

    #[test]
    fn test_echo_ids_are_swapped() {
        let payload: serde_json::Value = serde_json::from_str(
            r#"{
                "object": "page",
                "entry": [{"messaging": [{
                    "sender": {"id": "page-1"},
                    "recipient": {"id": "user-1"},
                    "message": {"mid": "m.2", "text": "Hi po!", "is_echo": true, "app_id": 263902037430900}
                }]}]
            }"#,
        )
        .unwrap();
        let events = extract_events(&payload);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_echo);
        assert_eq!(events[0].sender_id, "user-1");
        assert_eq!(events[0].page_id, "page-1");
        assert_eq!(events[0].app_id, Some(263902037430900));
    }

    #[test]
    fn test_attachments_and_postbacks_parse() {
        let payload: serde_json::Value = serde_json::from_str(
            r#"{
                "object": "page",
                "entry": [{"messaging": [
                    {
                        "sender": {"id": "user-1"},
                        "recipient": {"id": "page-1"},
                        "message": {"mid": "m.3", "attachments": [
                            {"type": "image", "payload": {"url": "https://cdn.example.com/r.jpg"}},
                            {"type": "location", "payload": {"coordinates": {"lat": 14.5, "long": 121.0}}}
                        ]}
                    },
                    {
                        "sender": {"id": "user-1"},
                        "recipient": {"id": "page-1"},
                        "postback": {"mid": "m.pb", "title": "Get Started", "payload": "GET_STARTED",
                                     "referral": {"ref": "summer", "source": "SHORTLINK", "type": "OPEN_THREAD"}}
                    }
                ]}]
            }"#,
        )
        .unwrap();
        let events = extract_events(&payload);

        assert_eq!(events[0].image_url(), Some("https://cdn.example.com/r.jpg"));
        assert_eq!(events[0].attachments[1].url, None);

        let postback = events[1].postback.as_ref().unwrap();
        assert_eq!(postback.payload, "GET_STARTED");
        assert_eq!(
            postback.referral.as_ref().and_then(|r| r.label()).as_deref(),
            Some("SHORTLINK:summer")
        );
        assert_eq!(events[1].message_id, None);
    }
}
