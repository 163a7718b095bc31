//! CPU Bringup - Inicialização de CPUs secundárias (AP)
//!
//! Sequência no BSP:
//!
//! 1. Tabela de descritores, thread idle e APIC ID de cada AP.
//! 2. Ambiente do trampoline (região + stacks), tudo ou nada.
//! 3. INIT, 10 ms, STARTUP, 200 µs, STARTUP.
//! 4. Espera todos os APs sinalizarem, desmapeia o trampoline, libera IPIs
//!    globais e só então solta os APs.
//!
//! Qualquer falha antes do passo 3 não envia IPI nenhum: o sistema segue
//! com uma CPU.

use super::percpu::{ApState, ProcessorDescriptor, ProcessorTable};
use super::SmpState;
use crate::arch::traits::CpuOps;
use crate::arch::x86_64::apic::LocalApic;
use crate::arch::x86_64::smp::{
    kernel_entry_address, ApBootEnvironment, BootParameters, STARTUP_VECTOR,
};
use crate::core::context::KernelContext;
use crate::sys::{KResult, KernelError};

/// Espera após o INIT IPI.
const INIT_DELAY_US: u64 = 10_000;
/// Espera entre os dois STARTUP IPIs.
const STARTUP_DELAY_US: u64 = 200;
/// Intervalo de polling do contador de prontidão.
const READY_POLL_US: u64 = 200;

/// Inicia todos os APs da topologia. Retorna o número de CPUs online.
pub fn boot_secondary_processors(ctx: &KernelContext) -> KResult<u32> {
    let platform = ctx.platform();
    let smp: &SmpState = ctx.smp();
    let apic = ctx.apic().ok_or(KernelError::HardwareAbsent)?;

    let table = ProcessorTable::new(smp.topology())?;
    let table = smp.install_processors(table).ok_or_else(|| {
        crate::kerror!("(SMP) Bring-up chamado duas vezes");
        KernelError::ProtocolViolation
    })?;
    if let Some(bsp) = table.bsp() {
        bsp.advance(ApState::FullyEnabled)?;
    }

    let aps = table.aps();
    if aps.is_empty() {
        crate::kinfo!("(SMP) Sistema uniprocessador");
        return Ok(1);
    }
    crate::kinfo!("(SMP) Iniciando APs: ", aps.len());

    for ap in aps {
        let idle = platform.scheduler.create_idle_thread(ap.cpu()).map_err(|_| {
            crate::kerror!("(SMP) Falha ao criar thread idle da CPU ", ap.cpu());
            KernelError::AllocationFailure
        })?;
        ap.set_idle_thread(idle);
        apic.register_processor(ap.cpu(), ap.apic_id());
    }

    let params = BootParameters {
        control: platform.cpu.control_registers(),
        descriptors: platform.cpu.descriptor_pointers(),
        kernel_map_base: ctx.tables().kernel_map_base,
        kernel_entry: kernel_entry_address(),
    };
    let env = ApBootEnvironment::build(platform.memory, &params, aps)?;

    let handshake = smp.handshake();
    handshake.arm(aps.len() as u32);

    table.advance_aps(ApState::InitSignaled)?;
    let targeted = smp.topology().is_truncated();
    if targeted {
        crate::kwarn!("(SMP) Topologia truncada: INIT/STARTUP por APIC ID");
    }
    send_startup_sequence(apic, platform.cpu, aps, targeted, || {
        table.advance_aps(ApState::StartupSent)
    })?;

    let checks = handshake.wait_for_all_ready(|| platform.cpu.microseconds_delay(READY_POLL_US));
    crate::kdebug!("(SMP) APs prontos após verificações: ", checks);

    env.unmap(platform.memory);
    apic.enable_smp_ipis();
    handshake.release();

    let online = table.len() as u32;
    crate::kok!("(SMP) CPUs iniciadas: ", online);
    Ok(online)
}

/// INIT, espera, STARTUP, espera, STARTUP.
///
/// Com `targeted` cada IPI vai para o APIC ID de um AP da tabela; senão usa
/// o shorthand "todos exceto eu", que também acorda CPUs fora da tabela.
/// `before_startup` roda entre o INIT e o primeiro STARTUP.
fn send_startup_sequence(
    apic: &LocalApic,
    cpu: &dyn CpuOps,
    aps: &[ProcessorDescriptor],
    targeted: bool,
    before_startup: impl FnOnce() -> KResult<()>,
) -> KResult<()> {
    if targeted {
        aps.iter().for_each(|ap| apic.send_init(ap.apic_id()));
    } else {
        apic.send_init_all_excluding_self();
    }
    cpu.microseconds_delay(INIT_DELAY_US);

    before_startup()?;
    for round in 0..2 {
        if round > 0 {
            cpu.microseconds_delay(STARTUP_DELAY_US);
        }
        if targeted {
            aps.iter().for_each(|ap| apic.send_startup(ap.apic_id(), STARTUP_VECTOR));
        } else {
            apic.send_startup_all_excluding_self(STARTUP_VECTOR);
        }
    }
    Ok(())
}

/// Lado do AP, chamado pelo `ap_kernel_entry` na stack de boot do AP.
///
/// Sinaliza prontidão, espera a liberação do BSP e só então habilita o
/// LAPIC e o timer local.
pub fn ap_entry(ctx: &KernelContext, descriptor: &ProcessorDescriptor, cpu: u32) -> KResult<()> {
    if descriptor.cpu() != cpu {
        crate::kerror!("(SMP) Descritor não corresponde à CPU ", cpu);
        return Err(KernelError::ProtocolViolation);
    }
    let platform = ctx.platform();
    let handshake = ctx.smp().handshake();

    descriptor.advance(ApState::RunningPreHandshake)?;
    handshake.signal_ready()?;
    handshake.wait_for_continue(|| platform.cpu.relax());

    // O BSP removeu o trampoline: descartar traduções antigas
    platform.cpu.flush_entire_tlb_local();
    descriptor.advance(ApState::HandshakeComplete)?;

    if let Some(apic) = ctx.apic() {
        apic.enable(cpu)?;
    }
    ctx.time().initialize_cpu(cpu);
    descriptor.advance(ApState::FullyEnabled)?;

    crate::kdebug!("(SMP) CPU online: ", cpu);
    Ok(())
}
