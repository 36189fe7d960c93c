//! Best-effort domain event publishing
//!
//! Events go out over NATS when a client is configured, mirroring how the
//! aggregate writes stay authoritative: a publish failure is logged and
//! dropped, never bubbled into the request.

use tracing::{debug, warn};

use crate::domain::events::DomainEvent;

pub struct EventPublisher {
    nats: Option<async_nats::Client>,
    prefix: String,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self {
        Self {
            nats,
            prefix: "orderhub".to_string(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub async fn publish(&self, event: DomainEvent) {
        let subject = format!("{}.{}", self.prefix, event.subject());
        let Some(client) = &self.nats else {
            debug!(subject = %subject, "event publisher disabled, dropping event");
            return;
        };
        let payload = match serde_json::to_vec(&event) {
            Ok(p) => p,
            Err(e) => {
                warn!(subject = %subject, error = %e, "failed to serialize event");
                return;
            }
        };
        if let Err(e) = client.publish(subject.clone(), payload.into()).await {
            warn!(subject = %subject, error = %e, "failed to publish event");
        }
    }
}
