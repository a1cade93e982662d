//! UDP relay: receives an RTP video stream, smooths it through the jitter
//! buffer and forwards released packets to a local decoder port. NACK
//! feedback is sent back to the address the stream arrives from.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use vjitter_core::logging::{parse_log_level, setup_logging, LoggingConfig};
use vjitter_core::prelude::*;
use vjitter_rtp_core::packet::hex_dump;
use vjitter_rtp_core::{RtpSsrc, DEFAULT_MAX_PACKET_SIZE};

/// Receive-side RTP video jitter buffer relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to receive RTP on
    #[arg(short, long, default_value = "0.0.0.0:5004")]
    listen: SocketAddr,

    /// Address released packets are forwarded to
    #[arg(short, long, default_value = "127.0.0.1:6000")]
    forward: SocketAddr,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target latency in milliseconds (overrides the config file)
    #[arg(long)]
    latency_ms: Option<u32>,

    /// Disable NACK feedback
    #[arg(long)]
    no_nack: bool,

    /// SSRC used as the sender of feedback packets
    #[arg(long, default_value_t = 0x766a_6974)]
    local_ssrc: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Include source file and line in log lines
    #[arg(long)]
    log_locations: bool,

    /// Seconds between statistics lines, 0 to disable
    #[arg(long, default_value_t = 5)]
    stats_interval: u64,
}

/// Writes released packets to the decoder as RTP datagrams
struct UdpFrameSink {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl FrameSink for UdpFrameSink {
    fn forward(&self, packet: ForwardedPacket) -> Result<()> {
        let data = packet.packet.serialize()?;
        self.socket.try_send_to(&data, self.target)?;
        Ok(())
    }
}

/// Sends NACKs to the most recent source address of the media stream
struct UdpFeedbackTransport {
    socket: Arc<UdpSocket>,
    local_ssrc: RtpSsrc,
    peer: Mutex<Option<SocketAddr>>,
}

impl UdpFeedbackTransport {
    fn set_peer(&self, addr: SocketAddr) {
        let mut peer = self.peer.lock();
        if *peer != Some(addr) {
            info!("Media source is {}", addr);
            *peer = Some(addr);
        }
    }
}

impl FeedbackTransport for UdpFeedbackTransport {
    fn local_ssrc(&self) -> RtpSsrc {
        self.local_ssrc
    }

    fn send_feedback(&self, _media_type: MediaType, nack: RtcpGenericNack) -> Result<()> {
        let peer = (*self.peer.lock())
            .ok_or_else(|| Error::Feedback("media source address not known yet".to_string()))?;
        let data = nack.serialize()?;
        self.socket.try_send_to(&data, peer)?;
        Ok(())
    }
}

fn load_config(args: &Args) -> Result<JitterBufferConfig> {
    let mut config = match &args.config {
        Some(path) => JitterBufferConfig::from_file(path)?,
        None => JitterBufferConfig::default(),
    };
    if let Some(latency) = args.latency_ms {
        config = config.with_target_latency_ms(latency);
    }
    if args.no_nack {
        config = config.with_nack(false);
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut logging = LoggingConfig::new(parse_log_level(&args.log_level)?, "vjitter-relay");
    if args.json_logs {
        logging = logging.with_json();
    }
    if args.log_locations {
        logging = logging.with_file_info();
    }
    setup_logging(logging)?;

    let config = load_config(&args)?;

    let media_socket = Arc::new(UdpSocket::bind(args.listen).await?);
    let forward_socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
    info!("Receiving RTP on {}, forwarding to {}", media_socket.local_addr()?, args.forward);

    let sink = Arc::new(UdpFrameSink {
        socket: forward_socket,
        target: args.forward,
    });
    let feedback = Arc::new(UdpFeedbackTransport {
        socket: media_socket.clone(),
        local_ssrc: args.local_ssrc,
        peer: Mutex::new(None),
    });

    let engine = JitterBufferEngine::new(config, sink, feedback.clone())?;
    let playback = engine.start_playback();

    let mut stats_timer = tokio::time::interval(Duration::from_secs(args.stats_interval.max(1)));
    let mut buf = vec![0u8; DEFAULT_MAX_PACKET_SIZE * 2];

    loop {
        tokio::select! {
            received = media_socket.recv_from(&mut buf) => {
                let (len, from) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Receive failed: {}", e);
                        continue;
                    }
                };
                match RtpPacket::parse(&buf[..len]) {
                    Ok(packet) => {
                        feedback.set_peer(from);
                        engine.receive_packet(packet);
                    }
                    Err(e) => debug!(
                        "Ignoring {} byte datagram from {}: {} [{}]",
                        len,
                        from,
                        e,
                        hex_dump(&buf[..len.min(16)])
                    ),
                }
            }
            _ = stats_timer.tick(), if args.stats_interval > 0 => {
                let stats = engine.stats();
                info!(
                    "received={} late={} released={} partial={} nacks={} forwarded={} live={} latency={:?}ms rtt={:?}ms",
                    stats.packets_received,
                    stats.late_packets,
                    stats.frames_released,
                    stats.frames_partial,
                    stats.nack_messages,
                    stats.packets_forwarded,
                    stats.live_frames,
                    stats.estimated_latency_ms,
                    stats.mean_rtt_ms,
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    playback.stop().await;
    info!("Final statistics: {:?}", engine.stats());
    Ok(())
}
