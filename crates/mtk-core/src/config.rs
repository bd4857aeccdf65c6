/// Configuration for a [`crate::ring::Ring`] / [`crate::queue::Queue`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Ring buffer size as a power of 2 (default: 12 = 4096 slots).
    pub capacity_bits: u8,
    /// Enable metrics collection (slight overhead).
    pub enable_metrics: bool,
    /// Bounded growth policy. `None` disables growth (`push`/`push_wait`
    /// fail once the initial capacity is exhausted).
    pub growth: Option<GrowthConfig>,
}

/// Bounded-growth policy shared by the pool, the SPSC queue, and the FIFO.
#[derive(Debug, Clone, Copy)]
pub struct GrowthConfig {
    /// Number of additional items/slots added per growth step.
    pub chunk_size: usize,
    /// Maximum number of growth steps permitted over the lifetime of the
    /// structure; once reached, further growth requests fail closed.
    pub max_chunks: usize,
}

impl Config {
    /// Creates a new configuration with custom settings.
    ///
    /// # Panics
    ///
    /// Panics if `capacity_bits` is 0 or greater than 24 (16M slots max).
    pub const fn new(capacity_bits: u8, enable_metrics: bool, growth: Option<GrowthConfig>) -> Self {
        assert!(
            capacity_bits > 0 && capacity_bits <= 24,
            "capacity_bits must be between 1 and 24 (max 16M slots)"
        );
        Self {
            capacity_bits,
            enable_metrics,
            growth,
        }
    }

    /// Returns the capacity of the ring buffer.
    #[inline]
    pub const fn capacity(&self) -> usize {
        1 << self.capacity_bits
    }

    /// Returns the mask for index wrapping.
    #[inline]
    pub const fn mask(&self) -> usize {
        self.capacity() - 1
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity_bits: 12, // 4096 slots
            enable_metrics: false,
            growth: None,
        }
    }
}

/// Low-latency configuration: small ring, no growth, fits in L1 cache.
pub const LOW_LATENCY_CONFIG: Config = Config::new(10, false, None);

/// High-throughput configuration: large ring with bounded growth headroom.
pub const HIGH_THROUGHPUT_CONFIG: Config = Config::new(
    18,
    false,
    Some(GrowthConfig {
        chunk_size: 1 << 16,
        max_chunks: 4,
    }),
);
