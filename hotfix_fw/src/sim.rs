//! Host-side simulator of the benchmark hardware.
//!
//! One [`SimBoard`] stands in for all three hardware seams:
//!
//! - flash behind a controller with NOR semantics: erase sets a whole page to
//!   ones, programming can only clear bits, commands are ignored unless the
//!   matching write mode is enabled, and the controller stays busy for a few
//!   polls after each command;
//! - a cycle counter advanced by modelled costs;
//! - a Thumb executor for slot calls. Undefined and 32-bit encodings raise a
//!   fault that goes through the real [`FaultDispatcher::on_fault`], so the
//!   redirect logic under test is exactly the one that runs on the target.
//!
//! Every other 16-bit encoding executes as a one-cycle no-op, which is
//! accurate enough for the execution-safe candidates.

extern crate std;

use core::cell::{Cell, RefCell};
use std::vec;
use std::vec::Vec;

use crate::clock::CycleSource;
use crate::dispatch::{ExceptionFrame, FaultDispatcher};
use crate::rig::{Rig, SlotInvoker};
use crate::slot::{NonVolatileController, SlotStore, WriteMode};
use crate::thumb::{self, BX_LR};

/// Page erase, 85 ms at 64 MHz.
pub const ERASE_CYCLES: u32 = 5_440_000;
/// Word program, 41 µs at 64 MHz.
pub const PROGRAM_CYCLES: u32 = 2_624;
/// Call and return overhead of one slot invocation.
pub const CALL_CYCLES: u32 = 6;
/// Exception entry, dispatcher and exception return.
pub const FAULT_CYCLES: u32 = 48;

pub const SIM_HZ: u32 = 64_000_000;

/// Polls the controller reports busy after every command.
const BUSY_POLLS: u32 = 3;

/// Return address of a simulated call; not inside flash or the thunk.
const CALLER: u32 = 0xF000_0000;

/// Nested faults or a looping slot end the call after this many steps.
const MAX_STEPS: u32 = 32;

pub struct SimBoard {
    page_size: u32,
    page_count: u32,
    flash: RefCell<Vec<u32>>,
    mode: Cell<WriteMode>,
    busy: Cell<u32>,
    cycles: Cell<u32>,
    erases: Cell<u32>,
    programs: Cell<u32>,
    icache_invalidations: Cell<u32>,
    invocations: Cell<u32>,
    thunk_runs: Cell<u32>,
    failing_erases: Cell<u32>,
    failing_programs: Cell<u32>,
    dispatcher: FaultDispatcher,
}

impl SimBoard {
    /// Erased flash of `page_count` pages based at address 0, with a
    /// dispatcher already bound to the last page.
    pub fn new(page_size: u32, page_count: u32) -> Self {
        let words = (page_size / 4 * page_count) as usize;
        let board = Self {
            page_size,
            page_count,
            flash: RefCell::new(vec![u32::MAX; words]),
            mode: Cell::new(WriteMode::ReadOnly),
            busy: Cell::new(0),
            cycles: Cell::new(0),
            erases: Cell::new(0),
            programs: Cell::new(0),
            icache_invalidations: Cell::new(0),
            invocations: Cell::new(0),
            thunk_runs: Cell::new(0),
            failing_erases: Cell::new(0),
            failing_programs: Cell::new(0),
            dispatcher: FaultDispatcher::new(),
        };
        board.dispatcher.bind(board.bench_page());
        board
    }

    /// nRF52840 geometry: 256 pages of 4 KiB.
    pub fn nrf52840() -> Self {
        Self::new(4096, 256)
    }

    pub fn bench_page(&self) -> u32 {
        self.page_size * (self.page_count - 1)
    }

    pub fn dispatcher(&self) -> &FaultDispatcher {
        &self.dispatcher
    }

    /// A rig whose every seam is this board.
    pub fn rig(&self, sentinel: u16) -> Rig<'_, &Self, &Self, &Self> {
        Rig::new(SlotStore::new(self), self, self, &self.dispatcher, sentinel)
    }

    pub fn peek(&self, addr: u32) -> u32 {
        self.flash.borrow()[(addr / 4) as usize]
    }

    /// Writes flash directly, bypassing the controller.
    pub fn poke(&self, addr: u32, word: u32) {
        self.flash.borrow_mut()[(addr / 4) as usize] = word;
    }

    pub fn mode(&self) -> WriteMode {
        self.mode.get()
    }

    pub fn erase_count(&self) -> u32 {
        self.erases.get()
    }

    pub fn program_count(&self) -> u32 {
        self.programs.get()
    }

    pub fn icache_invalidations(&self) -> u32 {
        self.icache_invalidations.get()
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.get()
    }

    /// Times execution entered the RAM thunk.
    pub fn thunk_runs(&self) -> u32 {
        self.thunk_runs.get()
    }

    /// The next `n` erase commands are accepted but have no effect.
    pub fn fail_next_erases(&self, n: u32) {
        self.failing_erases.set(n);
    }

    /// The next `n` program commands are accepted but have no effect.
    pub fn fail_next_programs(&self, n: u32) {
        self.failing_programs.set(n);
    }

    fn tick(&self, cycles: u32) {
        self.cycles.set(self.cycles.get().wrapping_add(cycles));
    }

    fn in_flash(&self, addr: u32) -> bool {
        addr < self.page_size * self.page_count
    }

    fn take_failure(counter: &Cell<u32>) -> bool {
        match counter.get() {
            0 => false,
            n => {
                counter.set(n - 1);
                true
            }
        }
    }

    fn fetch(&self, pc: u32) -> Option<u16> {
        let thunk = self.dispatcher.thunk();
        let base = thunk.addr();
        if pc == base || pc == base.wrapping_add(2) {
            return Some(thunk.read()[((pc - base) / 2) as usize]);
        }
        if !self.in_flash(pc) {
            return None;
        }
        let word = self.peek(pc & !3);
        Some(if pc & 2 == 0 {
            thumb::leading_halfword(word)
        } else {
            thumb::trailing_halfword(word)
        })
    }
}

impl NonVolatileController for &SimBoard {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn is_ready(&self) -> bool {
        match self.busy.get() {
            0 => true,
            n => {
                self.busy.set(n - 1);
                false
            }
        }
    }

    fn set_mode(&mut self, mode: WriteMode) {
        self.mode.set(mode);
        self.busy.set(1);
    }

    fn erase(&mut self, page_addr: u32) {
        self.erases.set(self.erases.get() + 1);
        self.busy.set(BUSY_POLLS);
        self.tick(ERASE_CYCLES);
        if self.mode.get() != WriteMode::Erase || SimBoard::take_failure(&self.failing_erases) {
            return;
        }
        let first = (page_addr / 4) as usize;
        let words = (self.page_size / 4) as usize;
        self.flash.borrow_mut()[first..first + words].fill(u32::MAX);
    }

    fn program(&mut self, addr: u32, word: u32) {
        self.programs.set(self.programs.get() + 1);
        self.busy.set(BUSY_POLLS);
        self.tick(PROGRAM_CYCLES);
        if self.mode.get() != WriteMode::Write || SimBoard::take_failure(&self.failing_programs) {
            return;
        }
        self.flash.borrow_mut()[(addr / 4) as usize] &= word;
    }

    fn read(&self, addr: u32) -> u32 {
        self.peek(addr)
    }

    fn invalidate_icache(&mut self) {
        self.icache_invalidations
            .set(self.icache_invalidations.get() + 1);
    }
}

impl CycleSource for SimBoard {
    fn now(&self) -> u32 {
        self.cycles.get()
    }

    fn frequency_hz(&self) -> u32 {
        SIM_HZ
    }
}

impl SlotInvoker for &SimBoard {
    fn invoke(&mut self, slot_addr: u32) {
        self.invocations.set(self.invocations.get() + 1);
        self.tick(CALL_CYCLES);

        let thunk = self.dispatcher.thunk().addr();
        let mut frame = ExceptionFrame {
            lr: thumb::thumb_entry(CALLER),
            pc: thumb::thumb_entry(slot_addr),
            ..Default::default()
        };

        for _ in 0..MAX_STEPS {
            let pc = thumb::strip_thumb(frame.pc);
            if pc == CALLER {
                return;
            }
            if pc == thunk {
                self.thunk_runs.set(self.thunk_runs.get() + 1);
            }
            match self.fetch(pc) {
                Some(BX_LR) => frame.pc = frame.lr,
                Some(hw) if !thumb::is_udf(hw) && !thumb::is_wide_prefix(hw) => {
                    self.tick(1);
                    frame.pc = frame.pc.wrapping_add(2);
                }
                _ => {
                    self.tick(FAULT_CYCLES);
                    self.dispatcher.on_fault(&mut frame);
                }
            }
        }
        log::error!("simulated call into {:#010x} did not return", slot_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thumb::UDF_SENTINEL;
    use crate::FaultStatus;

    #[test]
    fn program_only_clears_bits() {
        let board = SimBoard::new(1024, 4);
        let mut nvm = &board;
        nvm.set_mode(WriteMode::Write);
        nvm.program(0, 0xFFFF_0F0F);
        nvm.program(0, 0xF0F0_FFFF);
        assert_eq!(board.peek(0), 0xF0F0_0F0F);
    }

    #[test]
    fn commands_need_their_write_mode() {
        let board = SimBoard::new(1024, 4);
        let mut nvm = &board;
        nvm.program(0, 0);
        assert_eq!(board.peek(0), u32::MAX);

        nvm.set_mode(WriteMode::Write);
        nvm.program(0, 0);
        nvm.erase(0);
        assert_eq!(board.peek(0), 0);
    }

    #[test]
    fn controller_reports_busy_after_commands() {
        let board = SimBoard::new(1024, 4);
        let mut nvm = &board;
        assert!(nvm.is_ready());
        nvm.set_mode(WriteMode::Erase);
        nvm.erase(0);
        assert!((0..BUSY_POLLS).all(|_| !nvm.is_ready()));
        assert!(nvm.is_ready());
    }

    #[test]
    fn sentinel_slot_faults_once_and_returns() {
        let board = SimBoard::new(1024, 4);
        let page = board.bench_page();
        board.poke(page, thumb::slot_word(UDF_SENTINEL));

        (&board).invoke(page);

        assert_eq!(board.dispatcher().fault_count(), 1);
        assert_eq!(board.dispatcher().status(), FaultStatus::InvalidFault);
        assert_eq!(board.now(), CALL_CYCLES + FAULT_CYCLES);
    }

    #[test]
    fn redirected_slot_runs_the_thunk() {
        let board = SimBoard::new(1024, 4);
        let page = board.bench_page();
        board.poke(page, thumb::slot_word(UDF_SENTINEL));
        board.dispatcher().arm(0x4040);

        (&board).invoke(page);

        assert_eq!(board.dispatcher().status(), FaultStatus::PatchOk);
        assert_eq!(board.thunk_runs(), 1);
        assert_eq!(board.now(), CALL_CYCLES + FAULT_CYCLES + 1);
    }

    #[test]
    fn wild_call_is_bounced_to_caller() {
        let board = SimBoard::new(1024, 4);

        (&board).invoke(0x2000_0000);

        assert_eq!(board.dispatcher().unexpected_count(), 1);
        assert_eq!(board.dispatcher().last_unexpected_pc(), 0x2000_0000);
    }
}
