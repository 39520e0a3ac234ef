//! Bounding requested container quotas to what the host actually has.
//!
//! Over-requests are silently downgraded: a task asking for more than the
//! host offers still runs, just with less.
use cell_model::MebiBytes;

pub const MEBI: i64 = 1024 * 1024;
pub const NANO: f64 = 1_000_000_000.0;

/// `min(requested, available)` for CPU cores.
pub fn clamp_cpu(requested: f32, available: f32) -> f32 {
    requested.min(available)
}

/// `min(requested, available)` for memory in MiB.
pub fn clamp_memory(requested: MebiBytes, available: MebiBytes) -> MebiBytes {
    if requested > available {
        available
    } else {
        requested
    }
}

/// CPU cores to the nano-CPU unit container backends expect.
pub fn nano_cpus(cpu: f32) -> i64 {
    (f64::from(cpu) * NANO) as i64
}

/// MiB to bytes.
pub fn memory_bytes(memory: MebiBytes) -> i64 {
    i64::from(memory) * MEBI
}

/// Host memory in whole MiB, saturating at `MebiBytes::MAX`.
pub fn available_memory(total_memory_bytes: u64) -> MebiBytes {
    MebiBytes::try_from(total_memory_bytes / MEBI as u64).unwrap_or(MebiBytes::MAX)
}
