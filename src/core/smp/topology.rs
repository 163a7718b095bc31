/// Arquivo: core/smp/topology.rs
///
/// Propósito: Topologia de processadores do sistema.
/// Mantém o registro das CPUs detectadas via ACPI MADT, seus IDs (APIC ID,
/// ACPI ID) e qual delas é o BSP.
///
/// Detalhes de Implementação:
/// - CPU lógica 0 é sempre o BSP; as demais seguem a ordem da MADT.
/// - Apenas processadores com o flag "enabled" entram na contagem habilitada.
/// - Sem MADT (ou MADT inválida) o chamador usa `uniprocessor`.
use alloc::vec::Vec;

use super::percpu::MAX_CPUS;
use crate::arch::x86_64::acpi::madt::{self, MadtInfo};
use crate::sys::{KResult, KernelError};

/// Identificador lógico de CPU (0 a N-1)
pub type CpuId = u32;

/// Informações sobre uma CPU detectada
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuInfo {
    /// ID lógico atribuído pelo kernel (índice na tabela)
    pub logical_id: CpuId,

    /// ID de Hardware (APIC ID / x2APIC ID)
    pub apic_id: u32,

    /// ID do Processador na ACPI
    pub acpi_id: u32,

    /// Indica se é o Bootstrap Processor (BSP)
    pub is_bsp: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuTopology {
    cpus: Vec<CpuInfo>,
    /// Processadores descritos (habilitados ou não)
    processor_count: usize,
    /// CPUs habilitadas além de `MAX_CPUS` ficaram de fora
    truncated: bool,
}

impl CpuTopology {
    /// Só o BSP.
    pub fn uniprocessor(bsp_apic_id: u32) -> Self {
        Self::build([(bsp_apic_id, 0)].into_iter(), bsp_apic_id, 1)
    }

    /// Topologia a partir de APIC IDs já conhecidos (ACPI ID = posição).
    pub fn from_apic_ids(apic_ids: &[u32], bsp_apic_id: u32) -> Self {
        let entries = apic_ids.iter().enumerate().map(|(i, id)| (*id, i as u32));
        Self::build(entries, bsp_apic_id, apic_ids.len())
    }

    pub fn from_madt(info: &MadtInfo, bsp_apic_id: u32) -> Self {
        let entries = info
            .processors
            .iter()
            .filter(|p| p.enabled)
            .map(|p| (p.apic_id, p.acpi_id));
        Self::build(entries, bsp_apic_id, info.processors.len())
    }

    /// Interpreta a MADT. `TopologyUnavailable` se ausente ou malformada.
    pub fn discover(madt_bytes: Option<&[u8]>, bsp_apic_id: u32) -> KResult<Self> {
        let bytes = madt_bytes.ok_or_else(|| {
            crate::kwarn!("(SMP) MADT ausente");
            KernelError::TopologyUnavailable
        })?;
        let info = madt::parse(bytes)?;
        Ok(Self::from_madt(&info, bsp_apic_id))
    }

    fn build(
        entries: impl Iterator<Item = (u32, u32)>,
        bsp_apic_id: u32,
        processor_count: usize,
    ) -> Self {
        let mut bsp_acpi_id = 0;
        let mut others: Vec<(u32, u32)> = Vec::new();
        for (apic_id, acpi_id) in entries {
            if apic_id == bsp_apic_id {
                bsp_acpi_id = acpi_id;
            } else if !others.iter().any(|(id, _)| *id == apic_id) {
                // x2APIC e LAPIC podem descrever o mesmo processador
                others.push((apic_id, acpi_id));
            }
        }

        let truncated = others.len() + 1 > MAX_CPUS;
        if truncated {
            crate::kwarn!("(SMP) CPUs além do limite ignoradas: ", others.len() + 1 - MAX_CPUS);
            others.truncate(MAX_CPUS - 1);
        }

        let mut cpus = Vec::with_capacity(others.len() + 1);
        cpus.push(CpuInfo {
            logical_id: 0,
            apic_id: bsp_apic_id,
            acpi_id: bsp_acpi_id,
            is_bsp: true,
        });
        for (i, (apic_id, acpi_id)) in others.into_iter().enumerate() {
            cpus.push(CpuInfo {
                logical_id: i as u32 + 1,
                apic_id,
                acpi_id,
                is_bsp: false,
            });
        }

        Self {
            processor_count: processor_count.max(cpus.len()),
            cpus,
            truncated,
        }
    }

    /// Processadores descritos pela plataforma.
    pub fn processor_count(&self) -> usize {
        self.processor_count
    }

    /// Há CPUs habilitadas fora da tabela: elas não podem receber IPIs
    /// com shorthand "todos exceto eu".
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// CPUs habilitadas (sempre >= 1).
    pub fn enabled_count(&self) -> usize {
        self.cpus.len()
    }

    pub fn cpus(&self) -> impl Iterator<Item = &CpuInfo> + '_ {
        self.cpus.iter()
    }

    pub fn apic_id(&self, cpu: CpuId) -> Option<u32> {
        self.cpus.get(cpu as usize).map(|c| c.apic_id)
    }

    pub fn bsp(&self) -> &CpuInfo {
        &self.cpus[0]
    }
}
