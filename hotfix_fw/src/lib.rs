//! Hotfix cost benchmark for Cortex-M4
//!
//! Compares two ways of replacing the single Thumb instruction held in a flash
//! "slot" (`[instruction][bx lr]`):
//!
//! - **Method A** keeps an undefined instruction in flash and intercepts the
//!   resulting UsageFault, redirecting execution into a RAM thunk that holds
//!   the replacement. See [`method_a`] and [`dispatch`].
//! - **Method B** erases the flash page and programs the replacement, then
//!   erases and programs the sentinel back. See [`method_b`] and [`slot`].
//!
//! [`bench`] enumerates candidate instructions, drives both methods over a
//! fixed sweep of repeat counts and reports cycle totals.
//!
//! All hardware access goes through three seams: [`slot::NonVolatileController`],
//! [`clock::CycleSource`] and [`rig::SlotInvoker`]. The `nrf52840` module binds
//! them to real registers; on the host the [`sim`] module provides a
//! deterministic simulator used by the tests.

#![cfg_attr(not(test), no_std)]

mod arch;

pub mod bench;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod method_a;
pub mod method_b;
pub mod report;
pub mod rig;
pub mod slot;
pub mod thumb;
pub mod vectors;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod nrf52840;

#[cfg(not(target_os = "none"))]
pub mod sim;

pub use config::BenchConfig;
pub use dispatch::{FaultDispatcher, FaultStatus};
pub use error::{BenchError, NvmError, TrialError};
pub use rig::Rig;
