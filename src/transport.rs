use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{lookup_host, UdpSocket};
use tokio::runtime::Handle;
use tracing::{debug, info, trace};

use crate::codec::{BinaryPropertyCodec, PayloadCodec};
use crate::config::TransportConfig;
use crate::dispatch::destination::DestinationResolver;
use crate::dispatch::executor::{BoundedExecutor, JobExecutor};
use crate::dispatch::send_job::{SendJob, SendJobHandle};
use crate::dispatch::send_socket::SendSocket;
use crate::error::{TransportError, TransportResult};
use crate::frame::builder::FrameBuilder;
use crate::frame::header::CorrelationId;
use crate::message::Message;
use crate::message_handler::MessageHandler;
use crate::receiver::FrameReceiver;


/// The sending side of the transport: splits messages into frames and replicates them to all
///  peers returned by the [DestinationResolver], except the local node itself.
pub struct DatagramTransport {
    frame_builder: FrameBuilder,
    local_addrs: Vec<SocketAddr>,
    resolver: Arc<dyn DestinationResolver>,
    socket: Arc<dyn SendSocket>,
    executor: Option<Arc<dyn JobExecutor>>,
    codec: Arc<dyn PayloadCodec>,
}

impl DatagramTransport {
    /// Creates a transport with explicit I/O collaborators. Without an executor, all send jobs run
    ///  on the task calling [DatagramTransport::post].
    pub async fn new(config: TransportConfig, resolver: Arc<dyn DestinationResolver>, socket: Arc<dyn SendSocket>, executor: Option<Arc<dyn JobExecutor>>) -> TransportResult<DatagramTransport> {
        validate(&config)?;

        let mut local_addrs = resolve_local_addrs(&config.self_addr).await?;
        match socket.local_addr() {
            Ok(addr) if !addr.ip().is_unspecified() && !local_addrs.contains(&addr) => local_addrs.push(addr),
            Ok(_) => {}
            Err(e) => debug!("socket has no local address: {}", e),
        }
        debug!("local addresses excluded from sending: {:?}", local_addrs);

        Ok(DatagramTransport {
            frame_builder: FrameBuilder::new(config.package_length),
            local_addrs,
            resolver,
            socket,
            executor,
            codec: Arc::new(BinaryPropertyCodec),
        })
    }

    /// Binds a UDP socket to the configured address and creates both sides of the transport on it,
    ///  using [BinaryPropertyCodec] for payloads. The returned receiver does nothing until its
    ///  receive loop is started.
    pub async fn bind(config: TransportConfig, resolver: Arc<dyn DestinationResolver>, handler: Arc<dyn MessageHandler>) -> TransportResult<(DatagramTransport, FrameReceiver)> {
        Self::bind_with_codec(config, resolver, handler, Arc::new(BinaryPropertyCodec)).await
    }

    /// Same as [DatagramTransport::bind], with both sides sharing a custom payload codec
    pub async fn bind_with_codec(config: TransportConfig, resolver: Arc<dyn DestinationResolver>, handler: Arc<dyn MessageHandler>, codec: Arc<dyn PayloadCodec>) -> TransportResult<(DatagramTransport, FrameReceiver)> {
        validate(&config)?;

        let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        info!("bound UDP socket to {:?}", socket.local_addr());

        let executor = match config.send_pool_size {
            Some(pool_size) => {
                let runtime = Handle::try_current()
                    .map_err(|e| TransportError::Unexpected(format!("no tokio runtime for sending: {}", e)))?;
                let executor: Arc<dyn JobExecutor> = Arc::new(BoundedExecutor::new(runtime, pool_size));
                Some(executor)
            }
            None => None,
        };

        let receiver = FrameReceiver::new(&config, socket.clone(), codec.clone(), handler);
        let transport = DatagramTransport::new(config, resolver, Arc::new(socket), executor).await?
            .with_codec(codec);
        Ok((transport, receiver))
    }

    /// Replaces the payload codec. Receivers of messages from this transport must use the same
    ///  codec, see [DatagramTransport::bind_with_codec].
    pub fn with_codec(mut self, codec: Arc<dyn PayloadCodec>) -> DatagramTransport {
        self.codec = codec;
        self
    }

    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Sends a message to all current peers.
    ///
    /// Encoding and framing errors are returned before anything is sent. After that, every
    ///  destination is handled by a separate send job whose outcome is available through the
    ///  returned [PostReceipt], so a failure for one destination does not affect the others.
    pub async fn post(&self, message: &Message) -> TransportResult<PostReceipt> {
        let payload = self.codec.encode(message.properties())?;
        let correlation_id = CorrelationId::random();
        let frames = Arc::new(self.frame_builder.build(message.topic(), correlation_id, &payload)?);

        debug!("posting message {} on topic {:?}: {} bytes in {} frames", correlation_id, message.topic(), payload.len(), frames.len());

        let destinations = self.resolver.resolve_destinations().await;
        let mut jobs = Vec::with_capacity(destinations.len());
        for to in destinations {
            if self.local_addrs.contains(&to) {
                trace!("skipping local address {:?}", to);
                continue;
            }

            let job = SendJob::new(to, frames.clone(), self.socket.clone());
            let job = match &self.executor {
                Some(executor) => match executor.try_submit(job) {
                    Ok(handle) => {
                        jobs.push(SendJobHandle::Spawned { to, handle });
                        continue;
                    }
                    Err(job) => {
                        debug!("send executor is saturated - sending message {} to {:?} on the calling task", correlation_id, to);
                        job
                    }
                }
                None => job,
            };
            jobs.push(SendJobHandle::Completed { to, result: job.run().await });
        }

        Ok(PostReceipt {
            correlation_id,
            jobs,
        })
    }
}

fn validate(config: &TransportConfig) -> TransportResult<()> {
    config.validate()
        .map_err(|e| TransportError::InvalidConfig(format!("{:#}", e)))
}

async fn resolve_local_addrs(self_addr: &str) -> TransportResult<Vec<SocketAddr>> {
    let unknown = |reason: String| TransportError::UnknownLocalAddress {
        addr: self_addr.to_string(),
        reason,
    };

    let addrs: Vec<SocketAddr> = lookup_host(self_addr).await
        .map_err(|e| unknown(e.to_string()))?
        .collect();
    if addrs.is_empty() {
        return Err(unknown("no addresses found".to_string()));
    }
    Ok(addrs)
}


/// The outcome of a single `post()`: one send job per destination, some of which may still be
///  running. Dropping the receipt does not cancel the jobs.
#[derive(Debug)]
pub struct PostReceipt {
    correlation_id: CorrelationId,
    jobs: Vec<SendJobHandle>,
}
impl PostReceipt {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn jobs(&self) -> &[SendJobHandle] {
        &self.jobs
    }

    pub fn num_destinations(&self) -> usize {
        self.jobs.len()
    }

    /// Waits for all send jobs, returning each destination's number of sent datagrams or error
    pub async fn join_all(self) -> Vec<(SocketAddr, TransportResult<usize>)> {
        let mut result = Vec::with_capacity(self.jobs.len());
        for job in self.jobs {
            let to = job.destination();
            result.push((to, job.join().await));
        }
        result
    }
}


#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use rstest::rstest;
    use tokio::sync::mpsc;
    use tokio::time;
    use crate::dispatch::destination::{MockDestinationResolver, StaticDestinations};
    use crate::dispatch::executor::MockJobExecutor;
    use crate::dispatch::send_socket::MockSendSocket;
    use crate::frame::header::MAX_TOPIC_LEN;
    use crate::message::{Properties, PropertyValue};
    use super::*;

    const SELF_ADDR: &str = "127.0.0.1:9810";

    fn addr(last: u8, port: u16) -> SocketAddr {
        SocketAddr::from(([10,0,0,last], port))
    }

    fn config() -> TransportConfig {
        let mut config = TransportConfig::default_ipv4(SELF_ADDR, SocketAddr::from(([0,0,0,0], 9810)));
        config.package_length = 64;
        config
    }

    fn resolver(destinations: Vec<SocketAddr>) -> Arc<dyn DestinationResolver> {
        let mut resolver = MockDestinationResolver::new();
        resolver.expect_resolve_destinations()
            .returning(move || destinations.clone());
        Arc::new(resolver)
    }

    fn small_message() -> Message {
        Message::new("mail-new", Properties::default())
            .with_property("uid", "42")
    }

    fn large_message() -> Message {
        Message::new("mail-new", Properties::default())
            .with_property("body", vec![7u8; 200])
    }

    fn num_frames(message: &Message) -> usize {
        let payload = BinaryPropertyCodec.encode(message.properties()).unwrap();
        FrameBuilder::new(64).build(message.topic(), CorrelationId::random(), &payload).unwrap().len()
    }

    /// a socket that counts datagrams per destination
    fn counting_socket(local_addr: SocketAddr, counter: Arc<AtomicUsize>) -> MockSendSocket {
        let mut socket = MockSendSocket::new();
        socket.expect_local_addr()
            .returning(move || Ok(local_addr));
        socket.expect_send_datagram()
            .returning(move |_, _| {
                counter.fetch_add(1, Ordering::AcqRel);
                Ok(())
            });
        socket
    }

    #[rstest]
    #[case::configured_self_addr(vec![SELF_ADDR.parse().unwrap(), addr(1, 1), addr(2, 2)], "0.0.0.0:9810")]
    #[case::socket_addr(vec![addr(1, 1), "127.0.0.2:7".parse().unwrap(), addr(2, 2)], "127.0.0.2:7")]
    #[case::both(vec![SELF_ADDR.parse().unwrap(), addr(1, 1), "127.0.0.2:7".parse().unwrap(), addr(2, 2)], "127.0.0.2:7")]
    #[tokio::test]
    async fn test_post_skips_local_addresses(#[case] destinations: Vec<SocketAddr>, #[case] socket_addr: &str) {
        let mut socket = MockSendSocket::new();
        let socket_addr: SocketAddr = socket_addr.parse().unwrap();
        socket.expect_local_addr()
            .returning(move || Ok(socket_addr));
        socket.expect_send_datagram()
            .withf(|to, _| *to == addr(1, 1) || *to == addr(2, 2))
            .times(2)
            .returning(|_, _| Ok(()));

        let transport = DatagramTransport::new(config(), resolver(destinations), Arc::new(socket), None).await.unwrap();
        let receipt = transport.post(&small_message()).await.unwrap();

        assert_eq!(receipt.num_destinations(), 2);
        let results = receipt.join_all().await;
        assert_eq!(results.iter().map(|(to, _)| *to).collect::<Vec<_>>(), vec![addr(1, 1), addr(2, 2)]);
        assert!(results.iter().all(|(_, r)| matches!(r, Ok(1))));
    }

    #[tokio::test]
    async fn test_post_without_executor_runs_inline() {
        let counter = Arc::new(AtomicUsize::new(0));
        let socket = counting_socket(addr(99, 1), counter.clone());
        let transport = DatagramTransport::new(config(), resolver(vec![addr(1, 1), addr(2, 2), addr(3, 3)]), Arc::new(socket), None).await.unwrap();

        let message = large_message();
        let receipt = transport.post(&message).await.unwrap();

        let frames_per_destination = num_frames(&message);
        assert!(frames_per_destination > 1);
        assert_eq!(counter.load(Ordering::Acquire), 3 * frames_per_destination);
        assert!(receipt.jobs().iter().all(|job| !job.is_spawned()));
    }

    #[tokio::test]
    async fn test_post_with_saturated_executor() {
        let counter = Arc::new(AtomicUsize::new(0));
        let socket = counting_socket(addr(99, 1), counter.clone());
        let executor: Arc<dyn JobExecutor> = Arc::new(BoundedExecutor::new(Handle::current(), 1));
        let destinations = (1..=5).map(|i| addr(i, 1000)).collect::<Vec<_>>();

        let transport = DatagramTransport::new(config(), resolver(destinations.clone()), Arc::new(socket), Some(executor)).await.unwrap();

        let message = large_message();
        let receipt = transport.post(&message).await.unwrap();

        // the single slot is taken by the first job, which does not run before this task yields
        assert_eq!(receipt.jobs().iter().filter(|job| job.is_spawned()).count(), 1);
        assert!(receipt.jobs()[0].is_spawned());

        let frames_per_destination = num_frames(&message);
        let results = receipt.join_all().await;
        assert_eq!(results.iter().map(|(to, _)| *to).collect::<Vec<_>>(), destinations);
        for (_, result) in results {
            assert_eq!(result.unwrap(), frames_per_destination);
        }
        assert_eq!(counter.load(Ordering::Acquire), 5 * frames_per_destination);
    }

    #[tokio::test]
    async fn test_post_with_rejecting_executor_runs_inline() {
        let counter = Arc::new(AtomicUsize::new(0));
        let socket = counting_socket(addr(99, 1), counter.clone());
        let mut executor = MockJobExecutor::new();
        executor.expect_try_submit()
            .times(2)
            .returning(Err);

        let transport = DatagramTransport::new(config(), resolver(vec![addr(1, 1), addr(2, 2)]), Arc::new(socket), Some(Arc::new(executor))).await.unwrap();
        let receipt = transport.post(&small_message()).await.unwrap();

        assert_eq!(counter.load(Ordering::Acquire), 2);
        assert!(receipt.jobs().iter().all(|job| !job.is_spawned()));
    }

    #[tokio::test]
    async fn test_post_failure_is_isolated_per_destination() {
        let mut socket = MockSendSocket::new();
        socket.expect_local_addr()
            .returning(|| Ok(addr(99, 1)));
        socket.expect_send_datagram()
            .returning(|to, _| {
                if to == addr(1, 1) {
                    Err(io::Error::other("network unreachable"))
                }
                else {
                    Ok(())
                }
            });

        let transport = DatagramTransport::new(config(), resolver(vec![addr(1, 1), addr(2, 2)]), Arc::new(socket), None).await.unwrap();
        let message = large_message();
        let results = transport.post(&message).await.unwrap().join_all().await;

        match &results[0] {
            (to, Err(TransportError::Io { to: Some(failed), .. })) => {
                assert_eq!(*to, addr(1, 1));
                assert_eq!(*failed, addr(1, 1));
            }
            other => panic!("expected I/O error, was {:?}", other),
        }
        assert_eq!(results[1].0, addr(2, 2));
        assert_eq!(*results[1].1.as_ref().unwrap(), num_frames(&message));
    }

    #[tokio::test]
    async fn test_post_topic_too_long_sends_nothing() {
        let mut socket = MockSendSocket::new();
        socket.expect_local_addr()
            .returning(|| Ok(addr(99, 1)));
        socket.expect_send_datagram().never();
        let mut resolver = MockDestinationResolver::new();
        resolver.expect_resolve_destinations().never();

        let mut config = config();
        config.package_length = 1472;
        let transport = DatagramTransport::new(config, Arc::new(resolver), Arc::new(socket), None).await.unwrap();

        let message = Message::new("x".repeat(MAX_TOPIC_LEN + 1), Properties::default());
        match transport.post(&message).await {
            Err(TransportError::ValueTooLarge { value, max, .. }) => {
                assert_eq!(value, MAX_TOPIC_LEN + 1);
                assert_eq!(max, MAX_TOPIC_LEN);
            }
            other => panic!("expected ValueTooLarge, was {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_post_encoding_fault_sends_nothing() {
        let mut socket = MockSendSocket::new();
        socket.expect_local_addr()
            .returning(|| Ok(addr(99, 1)));
        socket.expect_send_datagram().never();

        let transport = DatagramTransport::new(config(), resolver(vec![addr(1, 1)]), Arc::new(socket), None).await.unwrap();

        let mut value = PropertyValue::Null;
        for _ in 0..200 {
            value = PropertyValue::List(vec![value]);
        }
        let message = Message::new("t", Properties::default()).with_property("deep", value);
        assert!(matches!(transport.post(&message).await, Err(TransportError::Io { to: None, .. })));
    }

    #[tokio::test]
    async fn test_post_resolves_destinations_for_every_message() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let mut resolver = MockDestinationResolver::new();
        resolver.expect_resolve_destinations()
            .times(2)
            .returning(move || {
                if calls_clone.fetch_add(1, Ordering::AcqRel) == 0 {
                    vec![addr(1, 1)]
                }
                else {
                    vec![addr(1, 1), addr(2, 2)]
                }
            });

        let counter = Arc::new(AtomicUsize::new(0));
        let socket = counting_socket(addr(99, 1), counter.clone());
        let transport = DatagramTransport::new(config(), Arc::new(resolver), Arc::new(socket), None).await.unwrap();

        let first = transport.post(&small_message()).await.unwrap();
        assert_eq!(first.jobs().iter().map(|job| job.destination()).collect::<Vec<_>>(), vec![addr(1, 1)]);

        let second = transport.post(&small_message()).await.unwrap();
        assert_eq!(second.jobs().iter().map(|job| job.destination()).collect::<Vec<_>>(), vec![addr(1, 1), addr(2, 2)]);
        assert_ne!(first.correlation_id(), second.correlation_id());

        assert_eq!(calls.load(Ordering::Acquire), 2);
        assert_eq!(counter.load(Ordering::Acquire), 3);
    }

    #[rstest]
    #[case::no_port("no-port-given")]
    #[case::bad_port("127.0.0.1:notaport")]
    #[tokio::test]
    async fn test_unknown_local_address(#[case] self_addr: &str) {
        let mut config = config();
        config.self_addr = self_addr.to_string();

        let socket = MockSendSocket::new();
        match DatagramTransport::new(config, resolver(vec![]), Arc::new(socket), None).await {
            Err(TransportError::UnknownLocalAddress { addr, .. }) => assert_eq!(addr, self_addr),
            Err(e) => panic!("expected UnknownLocalAddress, was {:?}", e),
            Ok(_) => panic!("expected UnknownLocalAddress"),
        }
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let mut config = config();
        config.package_length = 10;

        let socket = MockSendSocket::new();
        assert!(matches!(
            DatagramTransport::new(config, resolver(vec![]), Arc::new(socket), None).await,
            Err(TransportError::InvalidConfig(_))
        ));
    }


    struct ChannelHandler(mpsc::Sender<(SocketAddr, Message)>);
    #[async_trait::async_trait]
    impl MessageHandler for ChannelHandler {
        async fn on_message(&self, sender: SocketAddr, message: Message) {
            self.0.send((sender, message)).await.unwrap();
        }
    }

    fn loopback_config() -> TransportConfig {
        let mut config = TransportConfig::default_ipv4("127.0.0.1:0", SocketAddr::from(([127,0,0,1], 0)));
        config.package_length = 64;
        config
    }

    #[tokio::test]
    async fn test_loopback_round_trip() {
        let (tx, mut rx) = mpsc::channel(16);
        let (transport_b, receiver_b) = DatagramTransport::bind(loopback_config(), Arc::new(StaticDestinations::default()), Arc::new(ChannelHandler(tx))).await.unwrap();
        let addr_b = receiver_b.local_addr().unwrap();
        assert!(transport_b.local_addrs().contains(&addr_b));
        let canceller_b = receiver_b.canceller();
        let recv_loop_b = tokio::spawn(receiver_b.recv_loop());

        let (unused_tx, _unused_rx) = mpsc::channel(1);
        let (transport_a, receiver_a) = DatagramTransport::bind(loopback_config(), Arc::new(StaticDestinations::new(vec![addr_b])), Arc::new(ChannelHandler(unused_tx))).await.unwrap();
        let addr_a = receiver_a.local_addr().unwrap();

        let small = small_message();
        let large = Message::new("bulk", Properties::default())
            .with_property("body", vec![7u8; 1000]);
        assert!(num_frames(&large) > 10);

        for message in [&small, &large] {
            let results = transport_a.post(message).await.unwrap().join_all().await;
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].0, addr_b);
            assert!(results[0].1.is_ok());
        }

        let mut received = Vec::new();
        for _ in 0..2 {
            let (from, message) = time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
            assert_eq!(from, addr_a);
            received.push(message);
        }
        received.sort_by(|a, b| a.topic().cmp(b.topic()));
        assert_eq!(received, vec![large, small]);

        canceller_b.cancel();
        recv_loop_b.await.unwrap().unwrap();
    }

    /// scrambles the binary encoding, so payloads only decode with the same codec on both sides
    struct ScramblingCodec;
    impl PayloadCodec for ScramblingCodec {
        fn encode(&self, properties: &Properties) -> TransportResult<bytes::Bytes> {
            let encoded = BinaryPropertyCodec.encode(properties)?;
            Ok(encoded.iter().map(|b| b ^ 0x5a).collect::<Vec<u8>>().into())
        }

        fn decode(&self, buf: &[u8]) -> anyhow::Result<Properties> {
            let unscrambled = buf.iter().map(|b| b ^ 0x5a).collect::<Vec<u8>>();
            BinaryPropertyCodec.decode(&unscrambled)
        }
    }

    #[tokio::test]
    async fn test_loopback_with_custom_codec() {
        let (tx, mut rx) = mpsc::channel(16);
        let codec: Arc<dyn PayloadCodec> = Arc::new(ScramblingCodec);
        let (_transport_b, receiver_b) = DatagramTransport::bind_with_codec(loopback_config(), Arc::new(StaticDestinations::default()), Arc::new(ChannelHandler(tx)), codec.clone()).await.unwrap();
        let addr_b = receiver_b.local_addr().unwrap();
        let canceller_b = receiver_b.canceller();
        let recv_loop_b = tokio::spawn(receiver_b.recv_loop());

        let (unused_tx, _unused_rx) = mpsc::channel(1);
        let (transport_a, _receiver_a) = DatagramTransport::bind_with_codec(loopback_config(), Arc::new(StaticDestinations::new(vec![addr_b])), Arc::new(ChannelHandler(unused_tx)), codec).await.unwrap();

        let message = Message::new("scrambled", Properties::default())
            .with_property("uid", "42")
            .with_property("body", vec![1u8; 300]);
        let results = transport_a.post(&message).await.unwrap().join_all().await;
        assert!(results[0].1.is_ok());

        let (_, received) = time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(received, message);

        canceller_b.cancel();
        recv_loop_b.await.unwrap().unwrap();
    }
}
