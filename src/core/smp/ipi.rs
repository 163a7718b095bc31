/// Arquivo: core/smp/ipi.rs
///
/// Propósito: Envio de Interrupções Inter-Processador (IPIs).
/// Usado para acordar CPUs ou pedir trabalho remoto depois do bring-up.
///
/// Detalhes de Implementação:
/// - Destino por CPU lógica (traduzida para APIC ID físico pelo LAPIC) ou
///   broadcast para todas as outras CPUs.
/// - Antes de o BSP liberar IPIs (fim do handshake) o envio é descartado.
use super::topology::CpuId;
use crate::arch::x86_64::apic::LocalApic;

/// Destino da IPI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpiTarget {
    /// Uma CPU específica
    Single(CpuId),
    /// Todas exceto a atual
    AllButSelf,
}

/// Envia a IPI de serviço para o destino. `false` se descartada.
pub fn send_ipi(apic: &LocalApic, target: IpiTarget) -> bool {
    let sent = match target {
        IpiTarget::Single(cpu) => apic.send_ipi(cpu),
        IpiTarget::AllButSelf => apic.broadcast_ipi(),
    };
    if !sent {
        crate::ktrace!("(SMP) IPI descartada");
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::mock::{leak, MockCpu, MockInterrupts, MockMemory};
    use crate::arch::x86_64::apic::regs::IPI_VECTOR;
    use crate::arch::x86_64::apic::icr::{Icr, Shorthand};

    #[test]
    fn test_targets_map_to_icr() {
        let cpu = leak(MockCpu::x2apic());
        let apic = leak(
            LocalApic::init(cpu, leak(MockInterrupts::new()), leak(MockMemory::new()), true)
                .unwrap(),
        );
        apic.register_processor(2, 0x21);
        assert!(!send_ipi(apic, IpiTarget::Single(2)));

        apic.enable_smp_ipis();
        assert!(send_ipi(apic, IpiTarget::Single(2)));
        assert!(send_ipi(apic, IpiTarget::AllButSelf));

        let log: alloc::vec::Vec<_> = cpu
            .icr_log()
            .into_iter()
            .map(|raw| Icr::from_x2_value(raw).unwrap())
            .collect();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].destination, 0x21);
        assert_eq!(log[0].shorthand, Shorthand::None);
        assert_eq!(log[1].shorthand, Shorthand::AllExcludingSelf);
        assert!(log.iter().all(|icr| icr.vector == IPI_VECTOR));
    }
}
