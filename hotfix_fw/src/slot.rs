//! Non-volatile slot store.
//!
//! The benchmark page starts with one word, `[instruction][bx lr]`. Flash can
//! only clear bits, so every change of the instruction is a full page erase
//! followed by a word program. Both sub-steps run with interrupts masked and
//! end with an instruction-cache invalidation since the page holds code.

use crate::arch;
use crate::error::NvmError;
use crate::thumb;

/// Write/erase enable state of the flash controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteMode {
    ReadOnly,
    Write,
    Erase,
}

/// Register-level access to a flash controller.
///
/// Commands return as soon as they are issued; [`SlotStore`] spins on
/// [`is_ready`](Self::is_ready) around every step.
pub trait NonVolatileController {
    fn page_size(&self) -> u32;
    fn page_count(&self) -> u32;
    fn is_ready(&self) -> bool;
    fn set_mode(&mut self, mode: WriteMode);
    /// Starts erasing the page at `page_addr`. Requires [`WriteMode::Erase`].
    fn erase(&mut self, page_addr: u32);
    /// Starts programming one word. Requires [`WriteMode::Write`].
    fn program(&mut self, addr: u32, word: u32);
    fn read(&self, addr: u32) -> u32;
    /// Drops cached instruction fetches after the flash contents changed.
    fn invalidate_icache(&mut self) {}
}

pub struct SlotStore<N> {
    nvm: N,
}

impl<N: NonVolatileController> SlotStore<N> {
    pub fn new(nvm: N) -> Self {
        Self { nvm }
    }

    pub fn page_size(&self) -> u32 {
        self.nvm.page_size()
    }

    pub fn total_size(&self) -> u32 {
        self.nvm.page_size() * self.nvm.page_count()
    }

    /// The last flash page. Keeping it free of linked code is up to the linker
    /// script.
    pub fn default_bench_page(&self) -> u32 {
        self.total_size() - self.page_size()
    }

    /// Leading halfword of the slot word.
    pub fn read_instruction(&self, page: u32) -> u16 {
        thumb::leading_halfword(self.nvm.read(page))
    }

    pub fn read_word(&self, page: u32) -> u32 {
        self.nvm.read(page)
    }

    pub fn is_programmed_with(&self, page: u32, hw: u16) -> bool {
        self.read_word(page) == thumb::slot_word(hw)
    }

    /// Erases `page` and programs `[hw][bx lr]` into its first word.
    ///
    /// Everything else in the page is lost. Fails when the read-back of the
    /// whole word does not match; nothing is retried. A slot whose trailer is
    /// still erased would fault forever at `slot + 2`.
    pub fn erase_and_program(&mut self, page: u32, hw: u16) -> Result<(), NvmError> {
        self.check_page(page)?;

        self.erase_page(page);
        self.program_word(page, thumb::slot_word(hw));

        if !self.is_programmed_with(page, hw) {
            return Err(NvmError::Readback {
                page,
                expected: thumb::slot_word(hw),
                found: self.read_word(page),
            });
        }
        Ok(())
    }

    fn check_page(&self, page: u32) -> Result<(), NvmError> {
        if page == 0 {
            return Err(NvmError::VectorPage { page });
        }
        let page_size = self.page_size();
        if page_size == 0 || page % page_size != 0 {
            return Err(NvmError::Misaligned { page, page_size });
        }
        let total_size = self.total_size();
        if page >= total_size {
            return Err(NvmError::OutOfRange { page, total_size });
        }
        Ok(())
    }

    fn erase_page(&mut self, page: u32) {
        let nvm = &mut self.nvm;
        arch::without_interrupts(|| {
            wait_ready(nvm);
            nvm.set_mode(WriteMode::Erase);
            wait_ready(nvm);
            nvm.erase(page);
            wait_ready(nvm);
            nvm.set_mode(WriteMode::ReadOnly);
            wait_ready(nvm);
        });
        self.flush();
    }

    fn program_word(&mut self, addr: u32, word: u32) {
        let nvm = &mut self.nvm;
        arch::without_interrupts(|| {
            wait_ready(nvm);
            nvm.set_mode(WriteMode::Write);
            wait_ready(nvm);
            nvm.program(addr, word);
            wait_ready(nvm);
            nvm.set_mode(WriteMode::ReadOnly);
            wait_ready(nvm);
        });
        self.flush();
    }

    fn flush(&mut self) {
        arch::code_barrier();
        self.nvm.invalidate_icache();
        arch::code_barrier();
    }
}

#[inline(always)]
fn wait_ready<N: NonVolatileController>(nvm: &N) {
    while !nvm.is_ready() {
        core::hint::spin_loop();
    }
}
