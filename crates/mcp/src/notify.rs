use async_trait::async_trait;
use rmcp::model::{LoggingLevel, LoggingMessageNotificationParam};
use rmcp::service::Peer;
use rmcp::RoleServer;
use serde_json::json;
use tracing::debug;

use sqlgate_core::{EventSink, GatewayEvent};

pub const LOGGER_NAME: &str = "sqlgate";

/// Forwards query events to the calling client as `notifications/message`.
pub struct PeerNotificationSink {
    peer: Peer<RoleServer>,
}

impl PeerNotificationSink {
    pub fn new(peer: Peer<RoleServer>) -> Self {
        Self { peer }
    }
}

pub fn notification_for(event: &GatewayEvent) -> LoggingMessageNotificationParam {
    let level = if event.is_failure() { LoggingLevel::Error } else { LoggingLevel::Info };
    LoggingMessageNotificationParam {
        level,
        logger: Some(LOGGER_NAME.to_string()),
        data: json!({
            "request_id": event.request_id(),
            "message": event.summary(),
        }),
    }
}

#[async_trait]
impl EventSink for PeerNotificationSink {
    async fn emit(&self, event: &GatewayEvent) {
        // Never fails the request.
        if let Err(error) = self.peer.notify_logging_message(notification_for(event)).await {
            debug!(
                event_name = "gateway.notify.failed",
                request_id = %event.request_id(),
                error = %error,
                "could not forward query event to client"
            );
        }
    }
}
