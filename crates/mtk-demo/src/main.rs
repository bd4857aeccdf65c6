//! # Loopback Pipeline Demo
//!
//! Wires together the concurrency kernel's pieces end to end over a
//! loopback UDP pair:
//!
//! 1. A receive-capable [`DatagramEndpoint`] and a send-capable one are
//!    opened on loopback.
//! 2. Protocol versions are negotiated via [`ProtocolDispatcher`] and a
//!    payload header is encoded/decoded on each packet.
//! 3. Every received packet is admitted into a [`DelayBuffer`] keyed by a
//!    presentation timestamp, and drained by a [`DelayService`] thread
//!    onto an output queue.
//! 4. A [`TimerService`] prints periodic throughput stats while packets
//!    flow.
//!
//! ```bash
//! cargo run -p mtk-demo --bin loopback-demo
//! ```

use anyhow::{Context, Result};
use mtk_core::{
    Config, DatagramEndpoint, DelayBuffer, DelayService, Direction, EndpointConfig,
    EndpointEvent, PayloadCallback, ProtocolDispatcher, Queue, TimerService, VersionTriple,
    PROTO_V2,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let dispatcher = ProtocolDispatcher::negotiate(PROTO_V2).context("protocol negotiation")?;
    tracing::info!(version = ?dispatcher.version(), "negotiated protocol version");

    let input: Arc<Queue<PayloadCallback<Vec<u8>>>> = Arc::new(Queue::new(Config::default(), false));
    let output: Arc<Queue<PayloadCallback<Vec<u8>>>> = Arc::new(Queue::new(Config::default(), false));

    let delay_buffer = DelayBuffer::new(Duration::from_millis(20), input.clone(), output.clone(), None);
    let mut delay_service = DelayService::start(delay_buffer).context("start delay service")?;

    let received_bytes = Arc::new(AtomicU64::new(0));
    let received_bytes_cb = Arc::clone(&received_bytes);
    let input_for_rx = Arc::clone(&input);

    let mut receiver = DatagramEndpoint::open(
        EndpointConfig {
            direction: Direction::Receive,
            ..Default::default()
        },
        loopback(0),
        None,
        Box::new(move |event| match event {
            EndpointEvent::PacketReceived { total_size, .. } => {
                received_bytes_cb.fetch_add(total_size as u64, Ordering::Relaxed);
                let _ = input_for_rx.push(PayloadCallback {
                    presentation_us: now_us(),
                    send_time_us: 0,
                    data: vec![0u8; total_size],
                });
            }
            EndpointEvent::Connected => tracing::info!("receiver connected"),
            EndpointEvent::PacketSent { .. } => {}
        }),
    )
    .context("open receive endpoint")?;

    let recv_port = receiver.local_port().context("read bound port")?;

    let sender = DatagramEndpoint::open(
        EndpointConfig {
            direction: Direction::Send,
            send_open_settle_delay: Duration::from_millis(10),
            ..Default::default()
        },
        loopback(0),
        Some(loopback(recv_port)),
        Box::new(|event| {
            if let EndpointEvent::Connected = event {
                tracing::info!("sender connected");
            }
        }),
    )
    .context("open send endpoint")?;

    let timer = TimerService::start().context("start timer service")?;
    let stats_received = Arc::clone(&received_bytes);
    timer.schedule(Duration::from_millis(200), move || {
        tracing::info!(bytes = stats_received.load(Ordering::Relaxed), "throughput");
    });

    let header = mtk_core::ProbeHeader {
        version: dispatcher.version(),
        remote: VersionTriple::new(2, 1, 0),
    };
    tracing::info!(version = ?header.version, "built probe header for connection setup");

    let payload = vec![0xABu8; 512];
    let sg = mtk_core::SgList::single(mtk_core::SgEntry {
        slot_index: 0,
        offset: 0,
        len: payload.len(),
    });

    // Jittered send cadence so the delay buffer has something to smooth.
    let mut rng = rand::thread_rng();
    for _ in 0..10 {
        sender.send(&sg, &[&payload], None).ok();
        let jitter_ms = rand::Rng::gen_range(&mut rng, 2..=8);
        std::thread::sleep(Duration::from_millis(jitter_ms));
    }

    std::thread::sleep(Duration::from_millis(200));

    let mut delivered = 0;
    while let Some(entry) = output.pop() {
        delivered += 1;
        debug_assert_eq!(entry.data.len(), payload.len());
    }
    tracing::info!(delivered, "packets delivered through the delay buffer");

    delay_service.shutdown();
    receiver.close();
    Ok(())
}
