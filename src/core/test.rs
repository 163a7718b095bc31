//! Testes do Core
//!
//! Suite de boot (feature `self_test`) executada pelo BSP no fim de
//! `bsp_bring_up`, com os APs já liberados.

use crate::core::context::KernelContext;
use crate::core::time::{ClockId, Precision};
use crate::klib::test_framework::{run_test_suite, SuiteSummary, TestCase, TestResult};

/// Casos de teste do Core
const CORE_TESTS: &[TestCase<KernelContext>] = &[
    TestCase::new("bsp_apic_enabled", test_bsp_apic_enabled),
    TestCase::new("handshake_complete", test_handshake_complete),
    TestCase::new("timer_roles", test_timer_roles),
    TestCase::new("monotonic_clock", test_monotonic_clock),
    TestCase::new("time_page", test_time_page),
];

/// Executa todos os testes do Core
pub fn run_core_tests(ctx: &KernelContext) -> SuiteSummary {
    run_test_suite("Core", ctx, CORE_TESTS)
}

fn test_bsp_apic_enabled(ctx: &KernelContext) -> TestResult {
    use crate::arch::x86_64::apic::ApicState;

    let Some(apic) = ctx.apic() else {
        return TestResult::Skip;
    };
    if apic.state(0) != ApicState::Enabled {
        crate::kerror!("(Core) LAPIC do BSP não habilitado");
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// Todos os APs esperados sinalizaram e foram liberados.
fn test_handshake_complete(ctx: &KernelContext) -> TestResult {
    let handshake = ctx.smp().handshake();
    if ctx.smp().processors().is_none() || handshake.expected() == 0 {
        return TestResult::Skip;
    }
    if handshake.ready_count() != handshake.expected() || !handshake.is_released() {
        crate::kerror!("(Core) APs prontos: ", handshake.ready_count());
        return TestResult::Fail;
    }
    TestResult::Pass
}

fn test_timer_roles(ctx: &KernelContext) -> TestResult {
    let registry = ctx.time().registry();
    if registry.time_keeper().is_none() || registry.system_timer().is_none() {
        crate::kerror!("(Core) Papel de timer sem dono");
        return TestResult::Fail;
    }
    if ctx.time().ticks_per_second() == 0 {
        return TestResult::Fail;
    }
    TestResult::Pass
}

fn test_monotonic_clock(ctx: &KernelContext) -> TestResult {
    let precision = if ctx.time().can_query_precise_time() {
        Precision::Precise
    } else {
        Precision::Coarse
    };
    let first = ctx.monotonic_time(precision);
    let second = ctx.monotonic_time(precision);
    if second < first {
        crate::kerror!("(Core) Relógio monotônico voltou, ns=", first.tv_nsec);
        return TestResult::Fail;
    }
    TestResult::Pass
}

/// Relógios monotônicos da TimePage saem do mesmo snapshot.
fn test_time_page(ctx: &KernelContext) -> TestResult {
    let clocks = ctx.time().time_page().read_all();
    let monotonic = clocks[ClockId::Monotonic as usize];
    let consistent = ClockId::ALL
        .iter()
        .filter(|id| !id.is_realtime())
        .all(|id| clocks[*id as usize] == monotonic);
    if !consistent {
        return TestResult::Fail;
    }
    TestResult::Pass
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::mock::{leak, MockCpu, MockInterrupts, MockMemory, MockPorts, MockScheduler};
    use crate::core::context::{Platform, PlatformTables};

    #[test]
    fn test_suite_on_uniprocessor_context() {
        let cpu = leak(MockCpu::x2apic());
        cpu.set_apic_timer_rate(6_250_000);
        let platform = Platform {
            cpu,
            memory: leak(MockMemory::new()),
            interrupts: leak(MockInterrupts::new()),
            scheduler: leak(MockScheduler::new()),
            ports: leak(MockPorts::new()),
        };
        let ctx = leak(KernelContext::new(platform, PlatformTables::default()).unwrap());
        ctx.bsp_bring_up().unwrap();

        let summary = run_core_tests(ctx);
        assert!(summary.all_passed());
        // Sem MADT: handshake não se aplica
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.passed, CORE_TESTS.len() - 1);
    }
}
