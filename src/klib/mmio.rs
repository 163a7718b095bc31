//! Janela de MMIO (Memory-Mapped I/O).
//!
//! Único ponto de acesso volátil do crate. xAPIC e HPET leem/escrevem
//! registradores através de uma `MmioWindow`, que valida offset e alinhamento
//! antes de delegar ao `volatile::VolatilePtr`.

use ::core::ptr::NonNull;
use volatile::VolatilePtr;

/// Região de registradores mapeada em memória.
#[derive(Debug, Clone, Copy)]
pub struct MmioWindow {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: A janela aponta para registradores de hardware; a exclusividade
// (ex: registradores do LAPIC só acessados pela própria CPU) é garantida
// pelos donos da janela, não pelo tipo.
unsafe impl Send for MmioWindow {}
unsafe impl Sync for MmioWindow {}

impl MmioWindow {
    /// Cria uma janela sobre `[base, base + len)`.
    ///
    /// # Safety
    ///
    /// A região deve estar mapeada (uncached para hardware real) e permanecer
    /// válida enquanto a janela existir.
    pub const unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    /// Endereço virtual base.
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Tamanho da janela em bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Lê um registrador de 32 bits.
    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        self.ptr::<u32>(offset).read()
    }

    /// Escreve um registrador de 32 bits.
    #[inline]
    pub fn write_u32(&self, offset: usize, value: u32) {
        self.ptr::<u32>(offset).write(value);
    }

    /// Lê um registrador de 64 bits.
    #[inline]
    pub fn read_u64(&self, offset: usize) -> u64 {
        self.ptr::<u64>(offset).read()
    }

    /// Escreve um registrador de 64 bits.
    #[inline]
    pub fn write_u64(&self, offset: usize, value: u64) {
        self.ptr::<u64>(offset).write(value);
    }

    fn ptr<T>(&self, offset: usize) -> VolatilePtr<'_, T> {
        let size = ::core::mem::size_of::<T>();
        assert!(offset % size == 0, "MMIO: offset desalinhado");
        assert!(offset + size <= self.len, "MMIO: offset fora da janela");
        // SAFETY: offset validado contra a janela, e a janela é válida por contrato de `new`.
        unsafe {
            let raw = self.base.as_ptr().add(offset) as *mut T;
            VolatilePtr::new(NonNull::new_unchecked(raw))
        }
    }
}
