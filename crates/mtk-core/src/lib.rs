//! Shared concurrency kernel for a low-latency media transport runtime.
//!
//! This crate carries the hardest-engineering pieces that every higher
//! layer of the runtime (payload reassembly, statistics, protocol-specific
//! adapters) builds on: a bounded object pool, an SPSC ring/queue, a
//! bounded FIFO with an overflow-combining callback, a deadline-ordered
//! timer service, a receive delay (jitter) buffer, a datagram endpoint,
//! and the protocol-version dispatch table that picks between wire
//! formats at connection time. See `SPEC_FULL.md` and `DESIGN.md` at the
//! workspace root for the full requirements and the grounding ledger.
//!
//! # Layout
//!
//! Dependency order (leaves first), mirroring `SPEC_FULL.md` §2:
//! [`signal`] → [`pool`] → [`ring`]/[`queue`] → [`fifo`] → [`timer`] →
//! [`delay`] → [`endpoint`] → [`proto`]. [`ancillary`] only depends on
//! `proto`'s encode/decode conventions, not on the runtime pieces.
//! [`logger`] is orthogonal — every component may log through it, but none
//! may call back into it from inside its own critical section.
//!
//! # Example
//!
//! ```
//! use mtk_core::{Config, Queue};
//!
//! let queue = Queue::<u64>::new(Config::default(), false);
//! queue.push(42).unwrap();
//! assert_eq!(queue.pop(), Some(42));
//! ```

mod ancillary;
mod backoff;
mod config;
mod delay;
mod endpoint;
mod error;
mod fifo;
mod invariants;
mod logger;
mod metrics;
mod pool;
mod proto;
mod queue;
mod reservation;
mod ring;
mod sg;
mod signal;
mod timer;

pub use ancillary::{
    decode_word, encode_word, packetize, unpacketize, AncillaryError, AncillaryFieldKind,
    AncillaryPacket, AncillaryPacketHeader, AncillaryPayloadHeader, UnpacketizeResult,
};
pub use backoff::Backoff;
pub use config::{Config, GrowthConfig, HIGH_THROUGHPUT_CONFIG, LOW_LATENCY_CONFIG};
pub use delay::{DelayBuffer, DelayService, PayloadCallback, PayloadErrorFreeBuffer, MAX_MISSED};
pub use endpoint::{
    AckStatus, DatagramEndpoint, Direction, EndpointConfig, EndpointEvent, UpwardCallback, MTU,
};
pub use error::{KernelError, Result};
pub use fifo::{Fifo, OverflowCallback};
pub use logger::{LogHandle, Logger, MultilineBuffer};
pub use metrics::{Metrics, MetricsSnapshot};
pub use pool::{Pool, PoolHandle};
pub use proto::{ProbeHeader, ProtocolDispatcher, Version, VersionTriple, PROTO_V1, PROTO_V2};
pub use queue::Queue;
pub use reservation::Reservation;
pub use ring::Ring;
pub use sg::{SgEntry, SgList};
pub use signal::{wait_many, Signal, WaitOutcome};
pub use timer::{TimerHandle, TimerService};
