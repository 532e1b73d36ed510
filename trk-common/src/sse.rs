//! Server-Sent Events (SSE) utilities
//!
//! Shared SSE plumbing for TRK services.

use crate::events::EventBus;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Heartbeat interval for every SSE endpoint
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Keep-alive configuration shared by all SSE responses
pub fn keep_alive() -> KeepAlive {
    KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat")
}

/// Forward every event on the bus to an SSE client
///
/// The event name is [`TrkEvent::event_type`](crate::events::TrkEvent::event_type)
/// and the data is the JSON-serialized event. Subscribers that fall behind skip
/// the missed events and keep streaming.
pub fn event_bus_sse_stream(
    event_bus: &EventBus,
    service_name: &'static str,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} events", service_name);

    let mut rx = event_bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let event_type = event.event_type().to_string();
                    match serde_json::to_string(&event) {
                        Ok(event_json) => {
                            debug!("SSE: Broadcasting event: {}", event_type);
                            yield Ok(Event::default().event(event_type).data(event_json));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE: {} client lagged, skipped {} events", service_name, skipped);
                }
                Err(RecvError::Closed) => {
                    info!("SSE: {} event bus closed", service_name);
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(keep_alive())
}
