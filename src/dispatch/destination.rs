use std::net::SocketAddr;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

/// Provides the current set of peer nodes that messages should be replicated to. This is
///  typically backed by cluster membership.
///
/// The resolver is queried for every message that is sent, so implementations should return
///  their current view rather than a snapshot taken at startup. The result may include the local
///  node, which the transport filters out.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DestinationResolver: Send + Sync + 'static {
    async fn resolve_destinations(&self) -> Vec<SocketAddr>;
}


/// A fixed list of destinations
#[derive(Debug, Clone, Default)]
pub struct StaticDestinations {
    destinations: Vec<SocketAddr>,
}
impl StaticDestinations {
    pub fn new(destinations: Vec<SocketAddr>) -> StaticDestinations {
        StaticDestinations { destinations }
    }
}

#[async_trait]
impl DestinationResolver for StaticDestinations {
    async fn resolve_destinations(&self) -> Vec<SocketAddr> {
        self.destinations.clone()
    }
}
