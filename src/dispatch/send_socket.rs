use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tracing::trace;

/// This is an abstraction for sending a single datagram on a UDP socket, introduced to facilitate
///  mocking the I/O part away for testing.
///
/// Implementations are shared by all concurrently running send jobs, so they must tolerate
///  concurrent calls. Each call must send one datagram atomically.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]) -> io::Result<()>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]) -> io::Result<()> {
        trace!("UDP socket: sending {} bytes to {:?}", datagram.len(), to);

        let sent = self.send_to(datagram, to).await?;
        if sent != datagram.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, format!("datagram truncated: sent {} of {} bytes", sent, datagram.len())));
        }
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.as_ref().local_addr()
    }
}
