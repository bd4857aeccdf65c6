//! Debug assertion macros for kernel invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.

// =============================================================================
// Bounded count (ring/queue)
// =============================================================================

/// Assert that count does not exceed capacity.
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "count {} exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

/// Assert that head does not advance past tail.
macro_rules! debug_assert_head_not_past_tail {
    ($new_head:expr, $tail:expr) => {
        debug_assert!(
            $new_head <= $tail,
            "advancing head {} beyond tail {}",
            $new_head,
            $tail
        )
    };
}

// =============================================================================
// Monotonic progress
// =============================================================================

/// Assert that a sequence number only increases.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// Sequence-space wrap detection (extremely unlikely but detectable)
// =============================================================================

/// Assert we haven't wrapped around u64 sequence space.
macro_rules! debug_assert_no_wrap {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new > $old || $old.wrapping_sub($new) > (1u64 << 32),
            "potential wrap detected: {} went from {} to {} (delta: {})",
            $name,
            $old,
            $new,
            $new.wrapping_sub($old)
        )
    };
}

// =============================================================================
// Initialized range check
// =============================================================================

/// Assert that we're reading from an initialized slot.
macro_rules! debug_assert_initialized_read {
    ($pos:expr, $head:expr, $tail:expr) => {
        debug_assert!(
            $pos >= $head && $pos < $tail,
            "reading slot at seq {} outside initialized range [{}, {})",
            $pos,
            $head,
            $tail
        )
    };
}

// =============================================================================
// Pool slot conservation
// =============================================================================

/// Assert `|free| + |in_use| + |in_flight| == total_capacity`.
macro_rules! debug_assert_pool_conserved {
    ($free:expr, $in_use:expr, $in_flight:expr, $total:expr) => {
        debug_assert!(
            $free + $in_use + $in_flight == $total,
            "free {} + in_use {} + in_flight {} != total {}",
            $free,
            $in_use,
            $in_flight,
            $total
        )
    };
}

// =============================================================================
// Pool empty on destroy
// =============================================================================

/// Assert the in-use list is empty before a pool is torn down.
macro_rules! debug_assert_pool_empty_on_destroy {
    ($in_use:expr) => {
        debug_assert!(
            $in_use == 0,
            "destroying pool with {} items still in use",
            $in_use
        )
    };
}

// =============================================================================
// Timer deadline list ordering
// =============================================================================

/// Assert the timer list remains non-decreasing in deadline after a splice.
macro_rules! debug_assert_timer_list_ordered {
    ($prev_deadline:expr, $next_deadline:expr) => {
        debug_assert!(
            $prev_deadline <= $next_deadline,
            "timer list out of order ({:?} > {:?})",
            $prev_deadline,
            $next_deadline
        )
    };
}

// =============================================================================
// Delay buffer send-time window
// =============================================================================

/// Assert a delay-buffer entry's send_time is clamped to `[now, now + d]`.
macro_rules! debug_assert_send_time_in_window {
    ($send:expr, $now:expr, $d:expr) => {
        debug_assert!(
            $send >= $now && $send <= $now + $d,
            "send_time {} outside window [{}, {}]",
            $send,
            $now,
            $now + $d
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_head_not_past_tail;
pub(crate) use debug_assert_initialized_read;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_no_wrap;
pub(crate) use debug_assert_pool_conserved;
pub(crate) use debug_assert_pool_empty_on_destroy;
pub(crate) use debug_assert_send_time_in_window;
pub(crate) use debug_assert_timer_list_ordered;
