//! TimePage: relógios grossos para o userspace sem syscall.
//!
//! Layout (C, estável): `{ seq1: u32, seq2: u32, clocks: [timespec; 5] }`,
//! mapeado somente-leitura em todo processo. O cliente valida com o mesmo
//! laço do seqlock: lê `seq1`, copia, lê `seq2`, repete se diferentes.

use super::clock::{ClockId, TimeSpec, CLOCK_ID_COUNT};
use crate::mm::PAGE_SIZE;
use crate::sync::SeqCell;

#[repr(C)]
pub struct TimePage {
    clocks: SeqCell<[TimeSpec; CLOCK_ID_COUNT]>,
}

/// A página física em si (uma página, alinhada).
#[repr(C, align(4096))]
pub struct TimePageFrame {
    pub page: TimePage,
}

const _: () = assert!(::core::mem::size_of::<TimePageFrame>() == PAGE_SIZE);
const _: () = assert!(::core::mem::size_of::<TimePage>() == 8 + 16 * CLOCK_ID_COUNT);

impl TimePage {
    pub const fn new() -> Self {
        Self {
            clocks: SeqCell::new([TimeSpec::ZERO; CLOCK_ID_COUNT]),
        }
    }

    /// Republica todos os relógios.
    ///
    /// # Safety
    ///
    /// Escritor único: só o handler do time-keeper chama.
    pub unsafe fn publish(&self, clocks: [TimeSpec; CLOCK_ID_COUNT]) {
        let mut guard = self.clocks.begin_write();
        *guard = clocks;
    }

    /// Leitura como o userspace faz.
    pub fn read(&self, clock: ClockId) -> TimeSpec {
        self.clocks.read_consistent(|clocks| clocks[clock as usize])
    }

    pub fn read_all(&self) -> [TimeSpec; CLOCK_ID_COUNT] {
        self.clocks.read()
    }

    pub fn sequence(&self) -> (u32, u32) {
        self.clocks.sequence()
    }
}

impl Default for TimePage {
    fn default() -> Self {
        Self::new()
    }
}

impl TimePageFrame {
    pub const fn new() -> Self {
        Self {
            page: TimePage::new(),
        }
    }
}

impl Default for TimePageFrame {
    fn default() -> Self {
        Self::new()
    }
}
