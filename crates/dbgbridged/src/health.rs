//! Structured health reporting for server lifecycle events.

use std::sync::Arc;

use dbgbridge_config::ChannelEndpoint;

use crate::server::ConnectionId;
use crate::transport::ListenerError;

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before the channel is bound.
    fn server_starting(&self, endpoint: &ChannelEndpoint);

    /// Invoked once the accept loop is running.
    fn server_started(&self, endpoint: &ChannelEndpoint, bound: bool);

    /// Invoked when the first bind attempt fails and is left to the accept
    /// loop to retry.
    fn bind_deferred(&self, endpoint: &ChannelEndpoint, error: &ListenerError);

    /// Invoked after every connection worker has been joined.
    fn server_stopped(&self, connections_joined: usize);

    /// Invoked when a connection worker starts.
    fn connection_opened(&self, id: ConnectionId);

    /// Invoked when a connection worker finishes.
    fn connection_closed(&self, id: ConnectionId);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn server_starting(&self, endpoint: &ChannelEndpoint) {
        (**self).server_starting(endpoint);
    }

    fn server_started(&self, endpoint: &ChannelEndpoint, bound: bool) {
        (**self).server_started(endpoint, bound);
    }

    fn bind_deferred(&self, endpoint: &ChannelEndpoint, error: &ListenerError) {
        (**self).bind_deferred(endpoint, error);
    }

    fn server_stopped(&self, connections_joined: usize) {
        (**self).server_stopped(connections_joined);
    }

    fn connection_opened(&self, id: ConnectionId) {
        (**self).connection_opened(id);
    }

    fn connection_closed(&self, id: ConnectionId) {
        (**self).connection_closed(id);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn server_starting(&self, endpoint: &ChannelEndpoint) {
        tracing::info!(
            target: "dbgbridged::health",
            event = "server_starting",
            channel = %endpoint,
            "starting command server"
        );
    }

    fn server_started(&self, endpoint: &ChannelEndpoint, bound: bool) {
        tracing::info!(
            target: "dbgbridged::health",
            event = "server_started",
            channel = %endpoint,
            bound,
            "command server accepting connections"
        );
    }

    fn bind_deferred(&self, endpoint: &ChannelEndpoint, error: &ListenerError) {
        tracing::warn!(
            target: "dbgbridged::health",
            event = "bind_deferred",
            channel = %endpoint,
            error = %error,
            transient = error.is_transient(),
            "channel bind failed; the accept loop will retry"
        );
    }

    fn server_stopped(&self, connections_joined: usize) {
        tracing::info!(
            target: "dbgbridged::health",
            event = "server_stopped",
            connections_joined,
            "command server stopped"
        );
    }

    fn connection_opened(&self, id: ConnectionId) {
        tracing::debug!(
            target: "dbgbridged::health",
            event = "connection_opened",
            connection = %id,
            "client connected"
        );
    }

    fn connection_closed(&self, id: ConnectionId) {
        tracing::debug!(
            target: "dbgbridged::health",
            event = "connection_closed",
            connection = %id,
            "client disconnected"
        );
    }
}
