use std::net::SocketAddr;
use std::time::Duration;

use anyhow::bail;

use crate::frame::header::DATA_HEADER_LEN;

/// The smallest supported package length. Anything smaller wastes most of each datagram on
///  frame headers.
pub const MIN_PACKAGE_LENGTH: usize = 64;

/// The maximum payload of a UDP datagram over IPV4
pub const MAX_PACKAGE_LENGTH: usize = 65_507;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// The address (`host:port`) under which other nodes reach this node. It is resolved once
    ///  when the transport is created, and messages are never sent to any of the resolved
    ///  addresses even if the destination resolver returns them.
    pub self_addr: String,

    /// The address that the (shared) UDP socket is bound to
    pub bind_addr: SocketAddr,

    /// This is the maximum number of bytes per frame, i.e. the payload size inside UDP packets.
    ///  Messages are split into frames of this size, and they are sent without IP level
    ///  fragmentation, so this size must be supported by all network connections between nodes.
    ///
    /// With full Ethernet frames and no optional IP headers, this payload is `1500 - 20 - 8 = 1472`
    ///  for IPV4 and `1500 - 40 - 8 = 1452` for IPV6.
    ///
    /// Choosing this value too big causes packets to be dropped, which may be partial if only some
    ///  of the routes support smaller frames. Choosing it too small wastes bandwidth.
    pub package_length: usize,

    /// The number of send jobs (i.e. destinations of a message) that are processed concurrently.
    ///  If all slots are taken, the task calling `post()` sends to the next destination itself.
    ///
    /// `None` means that all destinations are processed sequentially by the caller.
    pub send_pool_size: Option<usize>,

    /// Incomplete messages are discarded on the receiving side if they are not completed within
    ///  this interval after their first frame arrived
    pub reassembly_timeout: Duration,

    /// The maximum number of incomplete messages buffered on the receiving side. If it is
    ///  exceeded, the oldest incomplete message is discarded.
    pub max_pending_messages: usize,

    /// The maximum payload size of a message on the receiving side. Larger messages are dropped.
    pub max_message_size: usize,
}

impl TransportConfig {
    /// ipv4 with end-to-end full Ethernet MTU - without optional headers
    pub fn default_ipv4(self_addr: impl Into<String>, bind_addr: SocketAddr) -> TransportConfig {
        TransportConfig {
            self_addr: self_addr.into(),
            bind_addr,
            package_length: 1472,
            send_pool_size: Some(16),
            reassembly_timeout: Duration::from_secs(10),
            max_pending_messages: 1024,
            max_message_size: 16*1024*1024,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.package_length < MIN_PACKAGE_LENGTH {
            bail!("package length {} is too small, must be at least {}", self.package_length, MIN_PACKAGE_LENGTH);
        }
        if self.package_length > MAX_PACKAGE_LENGTH {
            bail!("package length {} exceeds the maximum UDP payload of {}", self.package_length, MAX_PACKAGE_LENGTH);
        }
        debug_assert!(self.package_length > DATA_HEADER_LEN);

        if self.send_pool_size == Some(0) {
            bail!("send pool size must be at least 1 - use `None` for sending on the caller's task");
        }
        if self.reassembly_timeout.is_zero() {
            bail!("reassembly timeout must not be zero");
        }
        if self.max_pending_messages == 0 {
            bail!("max pending messages must be at least 1");
        }
        if self.max_message_size == 0 {
            bail!("max message size must be at least 1");
        }
        Ok(())
    }
}
