//! Ambiente de boot dos APs.
//!
//! Uma região identity-mapped em `TRAMPOLINE_ADDRESS` com o código do
//! trampoline, o `ApBootInfo` e os arrays de stacks/descritores. Construída
//! inteira antes de qualquer IPI (tudo ou nada) e desmapeada pelo BSP depois
//! que o último AP sinalizou prontidão.

use alloc::vec::Vec;

use super::trampoline::{
    self, region_size, ApBootInfo, ARRAYS_OFFSET, BOOT_INFO_MAGIC, BOOT_INFO_OFFSET,
    BOOT_INFO_VERSION, GDTR_OFFSET, IDTR_OFFSET, TRAMPOLINE_ADDRESS,
};
use crate::arch::traits::{ControlRegisters, DescriptorPointers};
use crate::core::smp::percpu::ProcessorDescriptor;
use crate::mm::{IdentityRegion, KernelStack, MemoryManager, AP_STACK_SIZE};
use crate::sys::{KResult, KernelError};

/// Estado do BSP copiado para os APs.
#[derive(Debug, Clone, Copy)]
pub struct BootParameters {
    pub control: ControlRegisters,
    pub descriptors: DescriptorPointers,
    pub kernel_map_base: u64,
    /// Endereço de `ap_kernel_entry`
    pub kernel_entry: u64,
}

pub struct ApBootEnvironment {
    region: IdentityRegion,
    stacks: Vec<KernelStack>,
}

impl ApBootEnvironment {
    /// Mapeia a região, aloca uma stack por AP e preenche tudo.
    ///
    /// Qualquer falha desfaz o que já foi feito e retorna
    /// `AllocationFailure`; nenhum IPI pode ter sido enviado ainda.
    pub fn build(
        memory: &dyn MemoryManager,
        params: &BootParameters,
        aps: &[ProcessorDescriptor],
    ) -> KResult<Self> {
        if aps.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        let code = trampoline::code();
        if code.len() > BOOT_INFO_OFFSET {
            crate::kerror!("(SMP) Trampoline maior que o espaço reservado: ", code.len());
            return Err(KernelError::InvalidArgument);
        }

        let region = memory
            .allocate_identity_mapped_region(TRAMPOLINE_ADDRESS, region_size(aps.len()))
            .map_err(|_| {
                crate::kerror!("(SMP) Falha ao mapear a região do trampoline");
                KernelError::AllocationFailure
            })?;

        let mut stacks = Vec::new();
        if stacks.try_reserve_exact(aps.len()).is_err() {
            memory.unmap(region);
            return Err(KernelError::AllocationFailure);
        }
        for ap in aps {
            match memory.allocate_kernel_stack(AP_STACK_SIZE) {
                Ok(stack) => stacks.push(stack),
                Err(_) => {
                    crate::kerror!("(SMP) Falha ao alocar stack para a CPU ", ap.cpu());
                    for stack in stacks.drain(..) {
                        memory.free_kernel_stack(stack);
                    }
                    memory.unmap(region);
                    return Err(KernelError::AllocationFailure);
                }
            }
        }

        let mut env = Self { region, stacks };
        env.populate(code, params, aps);
        for (ap, stack) in aps.iter().zip(&env.stacks) {
            ap.set_boot_stack(*stack);
        }
        crate::kdebug!("(SMP) Ambiente de boot pronto, APs: ", aps.len());
        Ok(env)
    }

    fn populate(&mut self, code: &[u8], params: &BootParameters, aps: &[ProcessorDescriptor]) {
        let phys = self.region.phys();
        let count = aps.len();
        let stacks_offset = ARRAYS_OFFSET;
        let descriptors_offset = ARRAYS_OFFSET + 8 * count;

        self.region.write_bytes(0, code);

        let d = &params.descriptors;
        self.write_pseudo_descriptor(GDTR_OFFSET, d.gdt_limit, d.gdt_base);
        self.write_pseudo_descriptor(IDTR_OFFSET, d.idt_limit, d.idt_base);

        for (i, (ap, stack)) in aps.iter().zip(&self.stacks).enumerate() {
            let top = stack.top();
            self.region.write::<u64>(stacks_offset + 8 * i, top);
            let descriptor = ap as *const ProcessorDescriptor as u64;
            self.region.write::<u64>(descriptors_offset + 8 * i, descriptor);
        }

        let info = ApBootInfo {
            magic: BOOT_INFO_MAGIC,
            version: BOOT_INFO_VERSION,
            ap_cpu_counter: 0,
            ap_count: count as u32,
            cr0: params.control.cr0,
            cr3: params.control.cr3,
            cr4: params.control.cr4,
            gdtr: phys + GDTR_OFFSET as u64,
            idtr: phys + IDTR_OFFSET as u64,
            kernel_map_base: params.kernel_map_base,
            kernel_entry: params.kernel_entry,
            stacks_array: phys + stacks_offset as u64,
            descriptors_array: phys + descriptors_offset as u64,
        };
        self.region.write(BOOT_INFO_OFFSET, info);
    }

    /// `limit: u16` seguido de `base: u64` (formato de LGDT/LIDT).
    fn write_pseudo_descriptor(&mut self, offset: usize, limit: u16, base: u64) {
        self.region.write_bytes(offset, &limit.to_le_bytes());
        self.region.write_bytes(offset + 2, &base.to_le_bytes());
    }

    pub fn boot_info(&self) -> ApBootInfo {
        self.region.read(BOOT_INFO_OFFSET)
    }

    pub fn stacks(&self) -> &[KernelStack] {
        &self.stacks
    }

    pub fn region_phys(&self) -> u64 {
        self.region.phys()
    }

    /// Lê o array de topos de stack (como o trampoline enxerga).
    pub fn stack_top(&self, ap_index: usize) -> Option<u64> {
        (ap_index < self.stacks.len())
            .then(|| self.region.read::<u64>(ARRAYS_OFFSET + 8 * ap_index))
    }

    /// Lê o array de ponteiros de descritor.
    pub fn descriptor_pointer(&self, ap_index: usize) -> Option<u64> {
        let count = self.stacks.len();
        (ap_index < count)
            .then(|| self.region.read::<u64>(ARRAYS_OFFSET + 8 * count + 8 * ap_index))
    }

    /// Remove a região. Só após todos os APs saírem do trampoline; as stacks
    /// continuam como stacks de boot das CPUs.
    pub fn unmap(self, memory: &dyn MemoryManager) {
        crate::kdebug!("(SMP) Desmapeando trampoline em ", self.region.phys());
        memory.unmap(self.region);
    }
}
