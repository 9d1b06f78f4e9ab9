//! Hotfix benchmark firmware for the nRF52840
//!
//! Binds the fault dispatcher to the last flash page, runs the full sweep and
//! parks the core. Results and log lines go to the debugger over semihosting,
//! so run it with a probe attached and "break on exception" disabled: the
//! sweep takes hundreds of thousands of UsageFaults by design.
//!
//! Built for the host, the same sweep runs (shortened) against the simulator.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use core::fmt::Write;

    use cortex_m::asm;
    use cortex_m_rt::entry;
    use panic_halt as _;

    use hotfix_fw::nrf52840::{self, Dwt, HostLogger, HostOut, Nvmc, ThumbCall};
    use hotfix_fw::slot::SlotStore;
    use hotfix_fw::{bench, vectors, BenchConfig, Rig};

    #[entry]
    fn main() -> ! {
        HostLogger::init(log::LevelFilter::Info);
        let mut out = HostOut::open();

        let Some(mut cp) = cortex_m::Peripherals::take() else {
            idle();
        };
        let clock = Dwt::init(&mut cp.DCB, &mut cp.DWT);

        let cfg = BenchConfig::DEFAULT;
        if let Err(e) = cfg.validate() {
            log::error!("invalid configuration: {}", e);
            idle();
        }

        // SAFETY: nothing else drives the NVMC.
        let slots = SlotStore::new(unsafe { Nvmc::new() });
        let page = cfg.bench_page.unwrap_or_else(|| slots.default_bench_page());
        if let Err(e) = BenchConfig::validate_page(page, nrf52840::linked_flash_end()) {
            log::error!("invalid configuration: {}", e);
            idle();
        }

        // SAFETY: called once, before the first slot call; the slot on `page`
        // is only ever invoked with the dispatcher bound to it.
        let cpu = unsafe {
            vectors::install(page);
            ThumbCall::new()
        };

        let mut rig = Rig::new(slots, clock, cpu, &vectors::DISPATCHER, cfg.sentinel);
        if let Err(e) = bench::run(&mut rig, &cfg, page, &mut out) {
            log::error!("benchmark aborted: {}", e);
        }

        let _ = write!(out, "\r\n[END] halt\r\n");
        idle();
    }

    fn idle() -> ! {
        loop {
            asm::wfe();
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    use std::fmt;

    use hotfix_fw::sim::SimBoard;
    use hotfix_fw::{bench, BenchConfig};

    struct Stdout;

    impl fmt::Write for Stdout {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            print!("{s}");
            Ok(())
        }
    }

    struct StdoutLogger;

    impl log::Log for StdoutLogger {
        fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
            metadata.level() <= log::max_level()
        }

        fn log(&self, record: &log::Record<'_>) {
            if self.enabled(record.metadata()) {
                println!("[{}] {}", record.level(), record.args());
            }
        }

        fn flush(&self) {}
    }

    static LOGGER: StdoutLogger = StdoutLogger;
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(log::LevelFilter::Info);
    }

    let cfg = BenchConfig {
        loop_counts: &[1, 10, 100, 1_000],
        ..BenchConfig::DEFAULT
    };
    let board = SimBoard::nrf52840();
    let page = cfg.bench_page.unwrap_or_else(|| board.bench_page());
    board.dispatcher().bind(page);

    let mut rig = board.rig(cfg.sentinel);
    if let Err(e) = bench::run(&mut rig, &cfg, page, &mut Stdout) {
        log::error!("benchmark aborted: {}", e);
        std::process::exit(1);
    }
}
