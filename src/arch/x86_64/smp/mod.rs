//! # SMP Support
//!
//! Lado de arquitetura do bring-up dos APs: o trampoline em memória baixa,
//! a região que ele lê (`boot_env`) e o ponto de entrada em Rust que ele chama.

pub mod boot_env;
pub mod trampoline;

use ::core::ffi::c_void;

use crate::core::context::KernelContext;
use crate::core::smp::percpu::ProcessorDescriptor;

// Re-exports
pub use boot_env::{ApBootEnvironment, BootParameters};
pub use trampoline::{ApBootInfo, STARTUP_VECTOR, TRAMPOLINE_ADDRESS};

/// Entrada em Rust dos APs, chamada pelo trampoline já em long mode, com a
/// stack de boot carregada.
///
/// `descriptor` aponta para o `ProcessorDescriptor` do AP (tabela do BSP,
/// endereço estável) e `cpu` é o índice lógico.
#[no_mangle]
pub extern "C" fn ap_kernel_entry(descriptor: *const c_void, cpu: u32) -> ! {
    let Some(context) = KernelContext::try_get() else {
        // Contexto sempre instalado antes dos IPIs
        loop {
            ::core::hint::spin_loop();
        }
    };

    // SAFETY: o BSP escreveu no array do trampoline o endereço de um
    // descritor da `ProcessorTable`, que nunca é liberada.
    let descriptor = unsafe { &*(descriptor as *const ProcessorDescriptor) };

    if let Err(e) = context.ap_entry(descriptor, cpu) {
        panic!("(SMP) CPU {} falhou durante o bring-up: {}", cpu, e);
    }
    context.enter_idle(cpu)
}

/// Endereço gravado em `ApBootInfo::kernel_entry`.
pub fn kernel_entry_address() -> u64 {
    ap_kernel_entry as usize as u64
}
