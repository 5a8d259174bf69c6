use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, trace, warn};

use crate::dispatch::send_socket::SendSocket;
use crate::error::{TransportError, TransportResult};
use crate::frame::builder::FrameSequence;


/// Sends all frames of a message to a single destination, in order, one datagram per frame.
pub struct SendJob {
    to: SocketAddr,
    frames: Arc<FrameSequence>,
    socket: Arc<dyn SendSocket>,
}

impl SendJob {
    pub fn new(to: SocketAddr, frames: Arc<FrameSequence>, socket: Arc<dyn SendSocket>) -> SendJob {
        SendJob { to, frames, socket }
    }

    pub fn destination(&self) -> SocketAddr {
        self.to
    }

    /// Returns the number of datagrams sent.
    ///
    /// NB: A failure to send a frame aborts the job, i.e. the remaining frames are not sent. The
    ///      receiver will discard the incomplete message eventually, and there is no
    ///      retransmission
    pub async fn run(self) -> TransportResult<usize> {
        trace!("sending {} frames of message {} to {:?}", self.frames.len(), self.frames.correlation_id(), self.to);

        for (i, frame) in self.frames.frames().iter().enumerate() {
            if let Err(e) = self.socket.send_datagram(self.to, frame).await {
                error!("error sending frame {} of {} for message {} to {:?} - skipping the rest: {}", i+1, self.frames.len(), self.frames.correlation_id(), self.to, e);
                return Err(TransportError::io(self.to, e));
            }
        }
        Ok(self.frames.len())
    }
}


/// The handle of a send job that was submitted for a single destination. A job either runs on
///  an executor, or it ran to completion on the caller's task before `post()` returned.
#[derive(Debug)]
pub enum SendJobHandle {
    Spawned {
        to: SocketAddr,
        handle: JoinHandle<TransportResult<usize>>,
    },
    Completed {
        to: SocketAddr,
        result: TransportResult<usize>,
    },
}

impl SendJobHandle {
    pub fn destination(&self) -> SocketAddr {
        match self {
            SendJobHandle::Spawned { to, .. } => *to,
            SendJobHandle::Completed { to, .. } => *to,
        }
    }

    pub fn is_spawned(&self) -> bool {
        matches!(self, SendJobHandle::Spawned { .. })
    }

    /// Wait for the job to finish, returning the number of datagrams sent. A job that panicked or
    ///  was cancelled is reported as [TransportError::Unexpected].
    pub async fn join(self) -> TransportResult<usize> {
        match self {
            SendJobHandle::Completed { result, .. } => result,
            SendJobHandle::Spawned { to, handle } => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!("send job for {:?} terminated abnormally: {}", to, e);
                    Err(TransportError::Unexpected(format!("send job for {:?} terminated abnormally: {}", to, e)))
                }
            }
        }
    }
}
