//! Pool de stacks de kernel para os APs.
//!
//! Um `linked_list_allocator::Heap` sobre uma região reservada no boot.
//! Stacks são alinhadas a página e devolvidas ao pool se o bring-up abortar.
//!
//! O crate não aloca stacks sozinho: o bring-up pede cada uma ao
//! `MemoryManager` do kernel hospedeiro. `StackPool` é a implementação
//! pronta para esse lado; um `MemoryManager` sem alocador próprio delega
//! `allocate_kernel_stack`/`free_kernel_stack` a ele, como faz o
//! `MockMemory` dos testes de host.

use ::core::alloc::Layout;
use ::core::ptr::NonNull;

use linked_list_allocator::Heap;
use spin::Mutex;

use super::{KernelStack, PAGE_SIZE};
use crate::sys::{KResult, KernelError};

pub struct StackPool {
    heap: Mutex<Heap>,
}

impl StackPool {
    pub const fn empty() -> Self {
        Self {
            heap: Mutex::new(Heap::empty()),
        }
    }

    /// Entrega a região `[base, base + size)` ao pool.
    ///
    /// # Safety
    ///
    /// A região deve ser memória mapeada e não usada por mais ninguém.
    /// Deve ser chamado uma única vez.
    pub unsafe fn init(&self, base: *mut u8, size: usize) {
        self.heap.lock().init(base, size);
        crate::kdebug!("(MM) StackPool: bytes=", size);
    }

    pub fn allocate(&self, size: usize) -> KResult<KernelStack> {
        let layout = Self::layout(size)?;
        let ptr = self
            .heap
            .lock()
            .allocate_first_fit(layout)
            .map_err(|_| KernelError::AllocationFailure)?;
        Ok(KernelStack {
            base: ptr.as_ptr() as u64,
            size,
        })
    }

    pub fn free(&self, stack: KernelStack) {
        let Ok(layout) = Self::layout(stack.size) else {
            return;
        };
        if let Some(ptr) = NonNull::new(stack.base as *mut u8) {
            // SAFETY: a stack veio de `allocate` com o mesmo layout.
            unsafe { self.heap.lock().deallocate(ptr, layout) };
        }
    }

    /// Bytes livres no pool.
    pub fn free_bytes(&self) -> usize {
        self.heap.lock().free()
    }

    fn layout(size: usize) -> KResult<Layout> {
        if size == 0 {
            return Err(KernelError::InvalidArgument);
        }
        Layout::from_size_align(size, PAGE_SIZE).map_err(|_| KernelError::InvalidArgument)
    }
}

impl Default for StackPool {
    fn default() -> Self {
        Self::empty()
    }
}
