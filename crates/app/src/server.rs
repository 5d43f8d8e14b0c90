//! Actix Web server: status endpoints plus the producer, display and servo
//! WebSockets.
//!
//! Connection tasks never touch the fusion engine. Producers hand units to the
//! frame slot, consumers drain their own outbound queue.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use actix_ws::{AggregatedMessage, AggregatedMessageStream, Message, MessageStream, Session};
use anyhow::{Context, Result};
use ml_core::TrackerKind;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use video_ingest::ProducerUnit;

use crate::{
    coordinator::{
        registry::{Consumers, Registration, Role},
        slot::{FrameJob, FrameSlot, Submit},
    },
    telemetry,
};

/// Shared state backing HTTP handlers.
pub struct AppState {
    consumers: Arc<Consumers>,
    slot: FrameSlot,
    sequence: AtomicU64,
    detector_name: String,
    tracker_kind: TrackerKind,
    outbound_capacity: usize,
    max_frame_bytes: usize,
}

impl AppState {
    pub fn new(
        consumers: Arc<Consumers>,
        slot: FrameSlot,
        detector_name: String,
        tracker_kind: TrackerKind,
        outbound_capacity: usize,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            consumers,
            slot,
            sequence: AtomicU64::new(0),
            detector_name,
            tracker_kind,
            outbound_capacity,
            max_frame_bytes,
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Bind and run the server until it is stopped.
pub async fn serve(state: AppState, host: String, port: u16) -> Result<()> {
    let state = web::Data::new(state);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/", web::get().to(index_route))
            .route("/health", web::get().to(health_route))
            .route("/metrics", web::get().to(metrics_route))
            .route("/ws/webcam", web::get().to(producer_socket))
            .route("/ws/display", web::get().to(display_socket))
            .route("/ws/servo", web::get().to(servo_socket))
    })
    .bind((host.as_str(), port))
    .with_context(|| format!("Failed to bind {host}:{port}"))?
    .run();

    info!("Listening on http://{host}:{port} (ws: /ws/webcam, /ws/display, /ws/servo)");
    server.await.context("HTTP server error")
}

async fn index_route() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "pantilt detection-tracking server",
        "status": "running",
    }))
}

/// 503 once the fusion worker has stopped taking frames.
async fn health_route(state: web::Data<AppState>) -> HttpResponse {
    let (mut response, status) = if state.slot.is_open() {
        (HttpResponse::Ok(), "healthy")
    } else {
        (HttpResponse::ServiceUnavailable(), "unhealthy")
    };
    response.json(json!({
        "status": status,
        "detector": state.detector_name,
        "tracker": state.tracker_kind.label(),
        "display_consumers": state.consumers.display.len(),
        "servo_consumers": state.consumers.servo.len(),
    }))
}

/// Render the Prometheus registry.
async fn metrics_route() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

async fn producer_socket(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, session, stream) = actix_ws::handle(&req, body)?;
    let limit = state.max_frame_bytes;
    let stream = stream
        .max_frame_size(limit)
        .aggregate_continuations()
        .max_continuation_size(limit);
    actix_web::rt::spawn(producer_loop(state.into_inner(), session, stream));
    Ok(response)
}

async fn display_socket(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    consumer_socket(Role::Display, &req, body, state)
}

async fn servo_socket(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    consumer_socket(Role::Servo, &req, body, state)
}

fn consumer_socket(
    role: Role,
    req: &HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, session, stream) = actix_ws::handle(req, body)?;
    let registration = state
        .consumers
        .registry(role)
        .register(state.outbound_capacity);
    actix_web::rt::spawn(consumer_loop(
        state.into_inner(),
        role,
        registration,
        session,
        stream,
    ));
    Ok(response)
}

/// Read producer units until the socket closes.
///
/// Structured units wait for their acknowledgement before the next read.
/// Binary units are submitted and the loop moves on.
async fn producer_loop(
    state: Arc<AppState>,
    mut session: Session,
    mut stream: AggregatedMessageStream,
) {
    info!("Producer connected");
    while let Some(message) = stream.recv().await {
        let unit = match message {
            Ok(AggregatedMessage::Binary(bytes)) => ProducerUnit::Binary(bytes.to_vec()),
            Ok(AggregatedMessage::Text(text)) => match ProducerUnit::from_text(&text) {
                Ok(unit) => unit,
                Err(err) => {
                    warn!("Ignoring malformed producer message: {err}");
                    metrics::counter!("pantilt_frames_dropped_total", "reason" => "malformed")
                        .increment(1);
                    continue;
                }
            },
            Ok(AggregatedMessage::Ping(bytes)) => {
                if session.pong(&bytes).await.is_err() {
                    break;
                }
                continue;
            }
            Ok(AggregatedMessage::Pong(_)) => continue,
            Ok(AggregatedMessage::Close(reason)) => {
                debug!(?reason, "Producer sent close");
                break;
            }
            Err(err) => {
                warn!("Producer socket error: {err}");
                break;
            }
        };

        let (ack, ack_rx) = if unit.expects_ack() {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let job = FrameJob {
            unit,
            sequence: state.next_sequence(),
            received_at: Instant::now(),
            ack,
        };
        metrics::counter!("pantilt_frames_received_total").increment(1);
        if state.slot.submit(job) == Submit::Closed {
            warn!("Fusion worker is not accepting frames; closing producer");
            break;
        }

        let Some(ack_rx) = ack_rx else {
            continue;
        };
        match ack_rx.await {
            Ok(ack) => match serde_json::to_string(&ack) {
                Ok(body) => {
                    if session.text(body).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!("Failed to serialise acknowledgement: {err}"),
            },
            Err(_) => debug!("Frame was not processed; no acknowledgement sent"),
        }
    }
    info!("Producer disconnected");
    let _ = session.close(None).await;
}

/// Forward outbound messages to one consumer and answer its pings.
async fn consumer_loop(
    state: Arc<AppState>,
    role: Role,
    registration: Registration,
    mut session: Session,
    mut stream: MessageStream,
) {
    let Registration { id, mut outbound } = registration;
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    break;
                };
                if session.text(message.to_string()).await.is_err() {
                    break;
                }
            }
            incoming = stream.recv() => match incoming {
                Some(Ok(Message::Ping(bytes))) => {
                    if session.pong(&bytes).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(consumer = id, "{} socket error: {err}", role.label());
                    break;
                }
            },
        }
    }
    state.consumers.registry(role).remove(id);
    let _ = session.close(None).await;
}
