use std::net::SocketAddr;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

use crate::message::Message;

/// Application callback for messages that were received and reassembled completely.
///
/// The receive loop awaits the handler before it reads the next datagram, so handlers that do
///  substantial work should hand it off to a separate task.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, sender: SocketAddr, message: Message);
}
