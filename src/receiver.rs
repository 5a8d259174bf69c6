use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::{select, time};
use tracing::{debug, error, trace, warn};

use crate::codec::PayloadCodec;
use crate::config::TransportConfig;
use crate::error::TransportResult;
use crate::frame::reassembler::Reassembler;
use crate::message::Message;
use crate::message_handler::MessageHandler;

/// Large enough for any UDP datagram, so peers with a different package length are not truncated
const RECEIVE_BUFFER_SIZE: usize = 65_536;

const MIN_EXPIRY_INTERVAL: Duration = Duration::from_millis(10);


/// The receiving side of a transport: reads frames from the shared socket, reassembles them into
///  messages and passes them to a [MessageHandler].
pub struct FrameReceiver {
    socket: Arc<UdpSocket>,
    reassembler: Reassembler,
    codec: Arc<dyn PayloadCodec>,
    handler: Arc<dyn MessageHandler>,
    expiry_interval: Duration,
    cancel_sender: broadcast::Sender<()>,
    cancel_receiver: broadcast::Receiver<()>,
}

impl FrameReceiver {
    pub fn new(config: &TransportConfig, socket: Arc<UdpSocket>, codec: Arc<dyn PayloadCodec>, handler: Arc<dyn MessageHandler>) -> FrameReceiver {
        let (cancel_sender, cancel_receiver) = broadcast::channel(1);

        FrameReceiver {
            socket,
            reassembler: Reassembler::new(config.reassembly_timeout, config.max_pending_messages, config.max_message_size),
            codec,
            handler,
            expiry_interval: (config.reassembly_timeout / 4).max(MIN_EXPIRY_INTERVAL),
            cancel_sender,
            cancel_receiver,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Returns a handle for terminating the receive loop from the outside. Cancelling before the
    ///  loop is started makes it terminate immediately.
    pub fn canceller(&self) -> RecvLoopCanceller {
        RecvLoopCanceller {
            cancel_sender: self.cancel_sender.clone(),
        }
    }

    pub async fn recv_loop(mut self) -> TransportResult<()> {
        let socket = self.socket.clone();
        let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
        let mut expiry_ticks = time::interval(self.expiry_interval);

        trace!("starting receive loop on {:?}", socket.local_addr());

        loop {
            select! {
                r = socket.recv_from(&mut buf) => {
                    match r {
                        Ok((len, from)) => {
                            self.on_datagram(from, Bytes::copy_from_slice(&buf[..len])).await;
                        }
                        // ICMP 'port unreachable' for a previous send is reported on some platforms
                        Err(e) if matches!(e.kind(), io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused) => {
                            debug!("ignoring receive error: {}", e);
                        }
                        Err(e) => {
                            error!(error = ?e, "error receiving from datagram socket");
                            return Err(e.into());
                        }
                    }
                }
                _ = expiry_ticks.tick() => {
                    let num_expired = self.reassembler.expire(Instant::now());
                    if num_expired > 0 {
                        debug!("discarded {} expired incomplete messages", num_expired);
                    }
                }
                _ = self.cancel_receiver.recv() => break,
            }
        }

        debug!("receive loop on {:?} terminated", socket.local_addr());
        Ok(())
    }

    async fn on_datagram(&mut self, from: SocketAddr, datagram: Bytes) {
        let assembled = match self.reassembler.on_frame(from, datagram, Instant::now()) {
            Ok(Some(assembled)) => assembled,
            Ok(None) => return,
            Err(e) => {
                warn!("skipping invalid frame from {:?}: {}", from, e);
                return;
            }
        };

        match self.codec.decode(&assembled.payload) {
            Ok(properties) => {
                trace!("dispatching message {} on topic {:?} from {:?}", assembled.correlation_id, assembled.topic, from);
                self.handler.on_message(from, Message::new(assembled.topic, properties)).await;
            }
            Err(e) => {
                warn!("skipping message {} from {:?} - payload cannot be decoded: {}", assembled.correlation_id, from, e);
            }
        }
    }
}


#[derive(Clone)]
pub struct RecvLoopCanceller {
    cancel_sender: broadcast::Sender<()>,
}
impl RecvLoopCanceller {
    pub fn cancel(&self) {
        // sending fails only if the receive loop is gone already
        let _ = self.cancel_sender.send(());
    }
}
