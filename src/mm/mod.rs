//! # Contrato com o Gerenciador de Memória (MM)
//!
//! O bring-up SMP não gerencia page tables: consome um `MemoryManager` que
//! entrega a região identity-mapped do trampoline, stacks de kernel para os
//! APs e janelas MMIO (xAPIC, HPET).
//!
//! | Tipo | Responsabilidade |
//! |------|------------------|
//! | `IdentityRegion` | Região virt == phys em memória baixa, desmapeada após o handshake. |
//! | `KernelStack` | Stack de boot de um AP (vira a stack de boot permanente da CPU). |
//! | `stack::StackPool` | Pool de stacks sobre `linked_list_allocator`. |

pub mod stack;

use ::core::ptr::NonNull;

use crate::klib::mmio::MmioWindow;
use crate::sys::KResult;

pub use stack::StackPool;

/// Tamanho de página (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Tamanho da stack de boot de cada AP.
pub const AP_STACK_SIZE: usize = 64 * 1024;

/// Região identity-mapped (endereço virtual == físico em hardware real).
pub struct IdentityRegion {
    phys: u64,
    virt: NonNull<u8>,
    size: usize,
}

// SAFETY: a região pertence exclusivamente ao BSP até ser desmapeada.
unsafe impl Send for IdentityRegion {}

impl IdentityRegion {
    /// # Safety
    ///
    /// `[virt, virt + size)` deve estar mapeado e gravável até `unmap`.
    pub unsafe fn new(phys: u64, virt: NonNull<u8>, size: usize) -> Self {
        Self { phys, virt, size }
    }

    pub fn phys(&self) -> u64 {
        self.phys
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.virt.as_ptr()
    }

    /// Copia `bytes` para `offset`.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= self.size, "IdentityRegion: escrita fora da região");
        // SAFETY: limites verificados; região válida pelo contrato de `new`.
        unsafe {
            ::core::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.as_ptr().add(offset),
                bytes.len(),
            );
        }
    }

    /// Escreve um valor alinhado em `offset`.
    pub fn write<T: Copy>(&mut self, offset: usize, value: T) {
        self.check::<T>(offset);
        // SAFETY: limites e alinhamento verificados.
        unsafe { ::core::ptr::write_volatile(self.as_ptr().add(offset) as *mut T, value) }
    }

    /// Lê um valor alinhado em `offset`.
    pub fn read<T: Copy>(&self, offset: usize) -> T {
        self.check::<T>(offset);
        // SAFETY: limites e alinhamento verificados.
        unsafe { ::core::ptr::read_volatile(self.as_ptr().add(offset) as *const T) }
    }

    fn check<T>(&self, offset: usize) {
        let size = ::core::mem::size_of::<T>();
        assert!(offset + size <= self.size, "IdentityRegion: acesso fora da região");
        assert!(
            (self.as_ptr() as usize + offset) % ::core::mem::align_of::<T>() == 0,
            "IdentityRegion: acesso desalinhado"
        );
    }
}

/// Stack de kernel `[base, base + size)`. Cresce para baixo a partir de `top()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelStack {
    pub base: u64,
    pub size: usize,
}

impl KernelStack {
    pub fn top(&self) -> u64 {
        self.base + self.size as u64
    }
}

/// Serviços de memória consumidos pelo núcleo SMP/Tempo.
pub trait MemoryManager: Sync {
    /// Mapeia `size` bytes em `phys` com virt == phys.
    fn allocate_identity_mapped_region(&self, phys: u64, size: usize) -> KResult<IdentityRegion>;

    /// Remove o mapeamento. Nenhuma CPU pode estar executando na região.
    fn unmap(&self, region: IdentityRegion);

    /// Stack alinhada a página; pode delegar a um `StackPool`.
    fn allocate_kernel_stack(&self, size: usize) -> KResult<KernelStack>;

    fn free_kernel_stack(&self, stack: KernelStack);

    /// Mapeia registradores de dispositivo (uncached).
    fn map_mmio(&self, phys: u64, size: usize) -> KResult<MmioWindow>;
}
