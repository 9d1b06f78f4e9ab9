//! nRF52840 bindings: NVMC, DWT cycle counter, slot calls and the
//! semihosting log/diagnostic channel.
//!
//! No SoftDevice may be running; the NVMC is driven directly.

use core::fmt::Write;
use core::ptr::{read_volatile, write_volatile};

use cortex_m::peripheral::{DCB, DWT};
use cortex_m_semihosting::hio;

use crate::arch;
use crate::clock::CycleSource;
use crate::rig::SlotInvoker;
use crate::slot::{NonVolatileController, WriteMode};
use crate::thumb;

/// HFCLK after reset with the default `SystemInit`.
pub const CORE_CLOCK_HZ: u32 = 64_000_000;

const NVMC_BASE: usize = 0x4001_E000;
const NVMC_READY: *const u32 = (NVMC_BASE + 0x400) as *const u32;
const NVMC_CONFIG: *mut u32 = (NVMC_BASE + 0x504) as *mut u32;
const NVMC_ERASEPAGE: *mut u32 = (NVMC_BASE + 0x508) as *mut u32;
const NVMC_ICACHECNF: *mut u32 = (NVMC_BASE + 0x540) as *mut u32;

const FICR_BASE: usize = 0x1000_0000;
const FICR_CODEPAGESIZE: *const u32 = (FICR_BASE + 0x010) as *const u32;
const FICR_CODESIZE: *const u32 = (FICR_BASE + 0x014) as *const u32;

const CONFIG_REN: u32 = 0;
const CONFIG_WEN: u32 = 1;
const CONFIG_EEN: u32 = 2;

const ICACHECNF_CACHEEN: u32 = 1;

extern "C" {
    // Provided by `cortex-m-rt`'s `link.x`.
    static __sidata: u32;
    static __sdata: u32;
    static __edata: u32;
}

/// First flash address past the linked image (`.text`, `.rodata` and the
/// load image of `.data`).
pub fn linked_flash_end() -> u32 {
    // SAFETY: only the symbol addresses are taken.
    unsafe {
        let load = core::ptr::addr_of!(__sidata) as u32;
        let start = core::ptr::addr_of!(__sdata) as u32;
        let end = core::ptr::addr_of!(__edata) as u32;
        load + end.wrapping_sub(start)
    }
}

/// Owner of the NVMC.
pub struct Nvmc {
    _private: (),
}

impl Nvmc {
    /// # Safety
    ///
    /// At most one instance may exist, and nothing else (SoftDevice, other
    /// drivers) may use the NVMC.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl NonVolatileController for Nvmc {
    fn page_size(&self) -> u32 {
        unsafe { read_volatile(FICR_CODEPAGESIZE) }
    }

    fn page_count(&self) -> u32 {
        unsafe { read_volatile(FICR_CODESIZE) }
    }

    fn is_ready(&self) -> bool {
        unsafe { read_volatile(NVMC_READY) & 1 == 1 }
    }

    fn set_mode(&mut self, mode: WriteMode) {
        let config = match mode {
            WriteMode::ReadOnly => CONFIG_REN,
            WriteMode::Write => CONFIG_WEN,
            WriteMode::Erase => CONFIG_EEN,
        };
        unsafe { write_volatile(NVMC_CONFIG, config) }
    }

    fn erase(&mut self, page_addr: u32) {
        unsafe { write_volatile(NVMC_ERASEPAGE, page_addr) }
    }

    fn program(&mut self, addr: u32, word: u32) {
        unsafe { write_volatile(addr as *mut u32, word) }
    }

    fn read(&self, addr: u32) -> u32 {
        unsafe { read_volatile(addr as *const u32) }
    }

    /// Toggling CACHEEN drops every cached line.
    fn invalidate_icache(&mut self) {
        unsafe {
            let cnf = read_volatile(NVMC_ICACHECNF);
            write_volatile(NVMC_ICACHECNF, cnf & !ICACHECNF_CACHEEN);
            arch::code_barrier();
            write_volatile(NVMC_ICACHECNF, cnf | ICACHECNF_CACHEEN);
        }
    }
}

/// DWT `CYCCNT`.
pub struct Dwt {
    _private: (),
}

impl Dwt {
    /// Enables trace and starts the cycle counter from zero.
    pub fn init(dcb: &mut DCB, dwt: &mut DWT) -> Self {
        dcb.enable_trace();
        dwt.set_cycle_count(0);
        dwt.enable_cycle_counter();
        arch::code_barrier();
        Self { _private: () }
    }
}

impl CycleSource for Dwt {
    fn now(&self) -> u32 {
        DWT::cycle_count()
    }

    fn frequency_hz(&self) -> u32 {
        CORE_CLOCK_HZ
    }
}

/// Branches into the slot with `blx`.
pub struct ThumbCall {
    _private: (),
}

impl ThumbCall {
    /// # Safety
    ///
    /// Every address later passed to [`SlotInvoker::invoke`] must hold a
    /// `[instruction][bx lr]` slot whose faults the installed dispatcher
    /// resolves.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl SlotInvoker for ThumbCall {
    #[inline(never)]
    fn invoke(&mut self, slot_addr: u32) {
        let entry = thumb::thumb_entry(slot_addr) as usize;
        // SAFETY: guaranteed by `ThumbCall::new`.
        let slot: extern "C" fn() -> u32 = unsafe { core::mem::transmute(entry) };
        core::hint::black_box(slot());
    }
}

/// Diagnostic text sink on the host debugger's stdout.
pub struct HostOut(Option<hio::HostStream>);

impl HostOut {
    pub fn open() -> Self {
        Self(hio::hstdout().ok())
    }
}

impl core::fmt::Write for HostOut {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        match &mut self.0 {
            Some(out) => out.write_str(s),
            None => Ok(()),
        }
    }
}

/// `log` backend over semihosting.
pub struct HostLogger;

static LOGGER: HostLogger = HostLogger;

impl HostLogger {
    pub fn init(level: log::LevelFilter) {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(level);
        }
    }
}

impl log::Log for HostLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            cortex_m_semihosting::hprint!("[{}] {}\r\n", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}
