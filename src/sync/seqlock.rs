//! Seqlock - leitura sem lock, escritor único
//!
//! Um par de contadores (`update1`, `update2`) envolve os dados. O escritor
//! incrementa `update2` antes de mutar e publica `update1 = update2` ao
//! terminar; o leitor copia os dados entre as duas leituras e repete se os
//! contadores divergirem.
//!
//! ```text
//! Escritor:  update2 += 1 (acquire) ── fence(release) ── dados ── update1 = update2 (release)
//! Leitor:    u1 = update1 (acquire) ── cópia ── fence(acquire) ── u2 = update2 ── u1 == u2 ?
//! ```
//!
//! `SeqCell` é a célula crua (layout `#[repr(C)]` estável, usada também pela
//! TimePage exposta ao userspace). `SeqLock` adiciona a serialização dos
//! escritores.

use ::core::cell::UnsafeCell;
use ::core::ops::{Deref, DerefMut};
use ::core::sync::atomic::{fence, AtomicU32, Ordering};

/// Célula seqlock crua.
///
/// Layout: `{ update1: u32, update2: u32, data: T }`.
#[repr(C)]
pub struct SeqCell<T: Copy> {
    update1: AtomicU32,
    update2: AtomicU32,
    data: UnsafeCell<T>,
}

// SAFETY: Leitores só obtêm cópias validadas pelos contadores; escritores são
// serializados pelo contrato de `begin_write`.
unsafe impl<T: Copy + Send> Sync for SeqCell<T> {}
unsafe impl<T: Copy + Send> Send for SeqCell<T> {}

impl<T: Copy> SeqCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            update1: AtomicU32::new(0),
            update2: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Abre uma seção de escrita. Os dados são publicados no drop do guard.
    ///
    /// # Panics
    ///
    /// Se outra escrita já estiver aberta (escritor aninhado ou concorrente).
    /// Os contadores ficariam divergentes para sempre e os leitores girariam
    /// sem fim, então a violação é fatal.
    ///
    /// # Safety
    ///
    /// No máximo um escritor por vez. O chamador garante isso por construção
    /// (handler de IRQ único) ou por um lock externo.
    pub unsafe fn begin_write(&self) -> SeqWriteGuard<'_, T> {
        let iteration = self.update2.fetch_add(1, Ordering::Acquire);
        // Sem escrita em andamento, update1 == update2 antes do incremento
        let published = self.update1.load(Ordering::Relaxed);
        if published != iteration {
            panic!("seqlock: escritor concorrente (update1 != update2)");
        }
        // Ordena o incremento antes de qualquer escrita nos dados.
        fence(Ordering::Release);
        let value = ::core::ptr::read_volatile(self.data.get());
        SeqWriteGuard {
            cell: self,
            iteration,
            value,
        }
    }

    fn end_write(&self, iteration: u32, value: T) {
        // SAFETY: escritor único (contrato de begin_write).
        unsafe { ::core::ptr::write_volatile(self.data.get(), value) };
        self.update1
            .store(iteration.wrapping_add(1), Ordering::Release);
    }

    /// Executa `f` sobre uma cópia dos dados dentro da janela de leitura.
    ///
    /// `f` roda antes da validação (pode consultar hardware junto com a
    /// cópia) e pode ver dados rasgados; o resultado só é devolvido se
    /// nenhuma escrita atravessou a janela. Caso contrário, repete.
    pub fn read_consistent<R>(&self, mut f: impl FnMut(&T) -> R) -> R {
        loop {
            let before = self.update1.load(Ordering::Acquire);
            // SAFETY: a cópia pode estar rasgada; só é usada se os contadores
            // confirmarem que nenhuma escrita a atravessou.
            let snapshot = unsafe { ::core::ptr::read_volatile(self.data.get()) };
            let result = f(&snapshot);
            fence(Ordering::Acquire);
            let after = self.update2.load(Ordering::Relaxed);
            if before == after {
                return result;
            }
            ::core::hint::spin_loop();
        }
    }

    /// Cópia consistente dos dados.
    pub fn read(&self) -> T {
        self.read_consistent(|snapshot| *snapshot)
    }

    /// Indica se não há escrita em andamento.
    pub fn is_quiescent(&self) -> bool {
        self.update1.load(Ordering::Acquire) == self.update2.load(Ordering::Acquire)
    }

    /// Contadores `(update1, update2)`.
    pub fn sequence(&self) -> (u32, u32) {
        (
            self.update1.load(Ordering::Acquire),
            self.update2.load(Ordering::Acquire),
        )
    }
}

/// Seção de escrita aberta em uma `SeqCell`.
pub struct SeqWriteGuard<'a, T: Copy> {
    cell: &'a SeqCell<T>,
    iteration: u32,
    value: T,
}

impl<T: Copy> Deref for SeqWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Copy> DerefMut for SeqWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Copy> Drop for SeqWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.cell.end_write(self.iteration, self.value);
    }
}

/// Seqlock com escritores serializados por spinlock.
///
/// Leitores nunca tomam o lock. O chamador de `write` deve estar com
/// interrupções desabilitadas se o mesmo seqlock também for escrito em IRQ.
pub struct SeqLock<T: Copy> {
    writer: spin::Mutex<()>,
    cell: SeqCell<T>,
}

impl<T: Copy> SeqLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            writer: spin::Mutex::new(()),
            cell: SeqCell::new(value),
        }
    }

    /// Muta os dados dentro de uma seção de escrita e retorna o resultado de `f`.
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _serial = self.writer.lock();
        // SAFETY: o lock `writer` garante escritor único.
        let mut guard = unsafe { self.cell.begin_write() };
        f(&mut guard)
    }

    /// Veja [`SeqCell::read_consistent`].
    pub fn read_consistent<R>(&self, f: impl FnMut(&T) -> R) -> R {
        self.cell.read_consistent(f)
    }

    pub fn read(&self) -> T {
        self.cell.read()
    }

    pub fn is_quiescent(&self) -> bool {
        self.cell.is_quiescent()
    }
}
