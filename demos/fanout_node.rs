use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chunked_udp::config::TransportConfig;
use chunked_udp::dispatch::destination::StaticDestinations;
use chunked_udp::message::{Message, Properties};
use chunked_udp::message_handler::MessageHandler;
use chunked_udp::transport::DatagramTransport;
use clap::Parser;
use clap_derive::Parser;
use tokio::{select, time};
use tracing::{error, info, warn, Level};

#[derive(Parser)]
struct Args {
    /// the address other nodes use to reach this node, e.g. 127.0.0.1:9810
    self_address: String,

    #[clap(long)]
    bind_address: Option<String>,

    #[clap(long)]
    peer: Vec<String>,

    #[clap(long, default_value = "demo")]
    topic: String,

    #[clap(long, default_value_t = 1000)]
    interval_millis: u64,

    /// payload bytes added to each message, to exercise chunking
    #[clap(long, default_value_t = 0)]
    padding: usize,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

struct PrintingHandler;

#[async_trait]
impl MessageHandler for PrintingHandler {
    async fn on_message(&self, sender: SocketAddr, message: Message) {
        info!("received message on topic {:?} from {:?}: {:?}", message.topic(), sender, message.properties().get("seq"));
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.peer.is_empty() {
        return Err(anyhow!("missing peers"));
    }

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut peers = Vec::new();
    for s in args.peer {
        let peer: SocketAddr = s.parse()?;
        peers.push(peer);
    }

    let bind_addr: SocketAddr = args.bind_address
        .as_ref()
        .unwrap_or(&args.self_address)
        .parse()?;
    let config = TransportConfig::default_ipv4(args.self_address, bind_addr);

    let (transport, receiver) = DatagramTransport::bind(config, Arc::new(StaticDestinations::new(peers)), Arc::new(PrintingHandler)).await?;

    select! {
        result = receiver.recv_loop() => { result.map_err(Into::into) }
        result = post_periodically(&transport, args.topic, Duration::from_millis(args.interval_millis), args.padding) => { result }
    }
}

async fn post_periodically(transport: &DatagramTransport, topic: String, interval: Duration, padding: usize) -> anyhow::Result<()> {
    let mut ticks = time::interval(interval);
    let mut seq = 0i64;
    loop {
        ticks.tick().await;
        seq += 1;

        let message = Message::new(topic.clone(), Properties::default())
            .with_property("seq", seq)
            .with_property("padding", vec![0u8; padding]);

        for (to, result) in transport.post(&message).await?.join_all().await {
            match result {
                Ok(_) => {}
                Err(e) if e.is_transient() => warn!("message #{} was not sent to {:?}, next one may get through: {}", seq, to, e),
                Err(e) => error!("message #{} was not sent to {:?}: {}", seq, to, e),
            }
        }
    }
}
