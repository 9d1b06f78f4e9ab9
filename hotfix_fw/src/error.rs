use thiserror::Error;

use crate::dispatch::FaultStatus;

/// The flash page did not end up in the requested state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmError {
    #[error("page {page:#010x} is not aligned to {page_size} bytes")]
    Misaligned { page: u32, page_size: u32 },
    #[error("page {page:#010x} lies outside the {total_size} byte flash")]
    OutOfRange { page: u32, total_size: u32 },
    #[error("page {page:#010x} holds the vector table")]
    VectorPage { page: u32 },
    #[error("slot at {page:#010x} reads {found:#010x} after programming {expected:#010x}")]
    Readback { page: u32, expected: u32, found: u32 },
}

/// Which probe of a trial failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    After,
}

/// A trial's pre- or postcondition did not hold.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialError {
    #[error("{phase:?} probe: slot raised {faults} fault(s) ending in {status:?}, expected one InvalidFault")]
    Probe {
        phase: Phase,
        status: FaultStatus,
        faults: u32,
    },
    #[error("hit loop raised {observed} fault(s), expected {expected}")]
    FaultCount { expected: u32, observed: u32 },
    #[error("last hit resolved as {0:?}, expected PatchOk")]
    Status(FaultStatus),
    #[error(transparent)]
    Nvm(#[from] NvmError),
}

/// The sweep could not run.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchError {
    #[error("cannot bring slot to the sentinel: {0}")]
    Init(#[source] NvmError),
    #[error("diagnostic output failed")]
    Output(#[from] core::fmt::Error),
}

/// Rejected [`BenchConfig`](crate::BenchConfig).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("sentinel {0:#06x} is not a UDF encoding")]
    SentinelNotUndefined(u16),
    #[error("repeat-count sweep is empty")]
    EmptySweep,
    #[error("repeat counts must be strictly ascending")]
    UnorderedSweep,
    #[error("bench page {0:#010x} holds the vector table or is not word aligned")]
    BenchPage(u32),
}
