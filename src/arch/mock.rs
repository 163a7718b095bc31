//! Hardware simulado para testes de host.
//!
//! Cada mock implementa um dos contratos do núcleo (`CpuOps`, `PortIo`,
//! `MemoryManager`, `InterruptDispatch`, `SchedulerHooks`, `HardwareTimer`,
//! `PreciseCounter`) e registra o que recebeu para as asserções.

use ::core::cell::Cell;
use ::core::ptr::NonNull;
use ::core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use spin::{Mutex, Once};

use super::traits::{
    ControlRegisters, CpuFeatures, CpuOps, DescriptorPointers, InterruptDispatch, IrqHandler,
    PortIo,
};
use crate::drivers::timer::{HardwareTimer, PreciseCounter, TimerCapabilities, TimerKind};
use crate::klib::mmio::MmioWindow;
use crate::mm::{IdentityRegion, KernelStack, MemoryManager, StackPool};
use crate::sched::{SchedulerHooks, ThreadHandle};
use crate::sys::{KResult, KernelError};

/// Promove um valor a `'static` (os contratos guardam `&'static dyn`).
pub fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

/// Janela MMIO sobre memória zerada.
pub fn mmio_buffer(size: usize) -> MmioWindow {
    let words = size.div_ceil(8);
    let buf: &'static mut [u64] = Box::leak(alloc::vec![0u64; words].into_boxed_slice());
    let base = NonNull::new(buf.as_mut_ptr() as *mut u8).unwrap();
    unsafe { MmioWindow::new(base, size) }
}

std::thread_local! {
    static CURRENT_APIC_ID: Cell<Option<u32>> = const { Cell::new(None) };
    static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// APIC ID visto pela thread atual (simula a CPU que executa).
pub fn set_current_apic_id(id: u32) {
    CURRENT_APIC_ID.with(|c| c.set(Some(id)));
}

// --- CPU ---

const MSR_APIC_BASE: u32 = 0x1B;
const MSR_X2_ID: u32 = 0x802;
const MSR_X2_ICR: u32 = 0x830;
const MSR_X2_TIMER_INITIAL: u32 = 0x838;
const MSR_X2_TIMER_CURRENT: u32 = 0x839;
const ICR_PENDING: u64 = 1 << 12;
const DELIVERY_STARTUP: u64 = 0b110;

type StartupHook = Box<dyn Fn() + Send + Sync>;

pub struct MockCpu {
    features: CpuFeatures,
    msrs: Mutex<BTreeMap<u32, u64>>,
    apic_id: AtomicU32,
    timer_rate: AtomicU64,
    pending_polls: AtomicU64,
    icr_reads: AtomicU64,
    icr_log: Mutex<Vec<u64>>,
    startups: AtomicU64,
    on_startup: Once<StartupHook>,
    delayed_us: AtomicU64,
    tlb_flushes: AtomicU64,
    interrupt_disables: AtomicU64,
}

impl MockCpu {
    pub fn new(features: CpuFeatures) -> Self {
        let mut msrs = BTreeMap::new();
        // Base padrão, BSP, habilitado globalmente
        msrs.insert(MSR_APIC_BASE, 0xFEE0_0000 | (1 << 8) | (1 << 11));
        Self {
            features,
            msrs: Mutex::new(msrs),
            apic_id: AtomicU32::new(0),
            timer_rate: AtomicU64::new(0),
            pending_polls: AtomicU64::new(0),
            icr_reads: AtomicU64::new(0),
            icr_log: Mutex::new(Vec::new()),
            startups: AtomicU64::new(0),
            on_startup: Once::new(),
            delayed_us: AtomicU64::new(0),
            tlb_flushes: AtomicU64::new(0),
            interrupt_disables: AtomicU64::new(0),
        }
    }

    pub fn x2apic() -> Self {
        Self::new(CpuFeatures::APIC | CpuFeatures::MSR | CpuFeatures::X2APIC | CpuFeatures::TSC)
    }

    pub fn xapic() -> Self {
        Self::new(CpuFeatures::APIC | CpuFeatures::MSR | CpuFeatures::TSC)
    }

    /// APIC ID das threads sem `set_current_apic_id`.
    pub fn set_apic_id(&self, id: u32) {
        self.apic_id.store(id, Ordering::Relaxed);
    }

    /// Ticks por segundo do timer do LAPIC (já dividido).
    pub fn set_apic_timer_rate(&self, rate: u64) {
        self.timer_rate.store(rate, Ordering::Relaxed);
    }

    /// Próximas `polls` leituras do ICR retornam delivery pending.
    pub fn set_icr_pending_polls(&self, polls: u64) {
        self.pending_polls.store(polls, Ordering::Relaxed);
    }

    /// Executado quando o segundo STARTUP IPI é escrito.
    pub fn on_second_startup(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.on_startup.call_once(|| Box::new(hook));
    }

    pub fn icr_reads(&self) -> u64 {
        self.icr_reads.load(Ordering::Relaxed)
    }

    /// Comandos escritos no ICR (x2APIC), em ordem.
    pub fn icr_log(&self) -> Vec<u64> {
        self.icr_log.lock().clone()
    }

    pub fn msr(&self, msr: u32) -> u64 {
        self.msrs.lock().get(&msr).copied().unwrap_or(0)
    }

    pub fn delayed_us(&self) -> u64 {
        self.delayed_us.load(Ordering::Relaxed)
    }

    pub fn tlb_flushes(&self) -> u64 {
        self.tlb_flushes.load(Ordering::Relaxed)
    }

    /// Quantas vezes alguma thread executou CLI.
    pub fn interrupt_disables(&self) -> u64 {
        self.interrupt_disables.load(Ordering::Relaxed)
    }

    fn thread_apic_id(&self) -> u32 {
        CURRENT_APIC_ID
            .with(|c| c.get())
            .unwrap_or_else(|| self.apic_id.load(Ordering::Relaxed))
    }
}

impl CpuOps for MockCpu {
    fn features(&self) -> CpuFeatures {
        self.features
    }

    unsafe fn read_msr(&self, msr: u32) -> u64 {
        match msr {
            MSR_X2_ID => self.thread_apic_id() as u64,
            MSR_X2_ICR => {
                self.icr_reads.fetch_add(1, Ordering::Relaxed);
                let pending = self
                    .pending_polls
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                    .is_ok();
                if pending {
                    ICR_PENDING
                } else {
                    0
                }
            }
            _ => self.msr(msr),
        }
    }

    unsafe fn write_msr(&self, msr: u32, value: u64) {
        {
            let mut msrs = self.msrs.lock();
            msrs.insert(msr, value);
            if msr == MSR_X2_TIMER_INITIAL {
                msrs.insert(MSR_X2_TIMER_CURRENT, value);
            }
        }
        if msr == MSR_X2_ICR {
            self.icr_log.lock().push(value);
            if (value >> 8) & 0b111 == DELIVERY_STARTUP
                && self.startups.fetch_add(1, Ordering::AcqRel) + 1 == 2
            {
                if let Some(hook) = self.on_startup.get() {
                    hook();
                }
            }
        }
    }

    fn microseconds_delay(&self, us: u64) {
        self.delayed_us.fetch_add(us, Ordering::Relaxed);
        let rate = self.timer_rate.load(Ordering::Relaxed);
        if rate > 0 {
            let elapsed = us * rate / 1_000_000;
            let mut msrs = self.msrs.lock();
            if let Some(current) = msrs.get_mut(&MSR_X2_TIMER_CURRENT) {
                *current = current.saturating_sub(elapsed);
            }
        }
        std::thread::yield_now();
    }

    fn flush_entire_tlb_local(&self) {
        self.tlb_flushes.fetch_add(1, Ordering::Relaxed);
    }

    fn control_registers(&self) -> ControlRegisters {
        ControlRegisters {
            cr0: 0x8005_0033,
            cr3: 0x0010_1000,
            cr4: 0x0000_06A0,
        }
    }

    fn descriptor_pointers(&self) -> DescriptorPointers {
        DescriptorPointers {
            gdt_base: 0xFFFF_8000_0020_0000,
            gdt_limit: 0x37,
            idt_base: 0xFFFF_8000_0030_0000,
            idt_limit: 0xFFF,
        }
    }

    fn current_id(&self) -> u32 {
        self.thread_apic_id()
    }

    fn interrupts_enabled(&self) -> bool {
        INTERRUPTS_ENABLED.with(|c| c.get())
    }

    unsafe fn disable_interrupts(&self) {
        self.interrupt_disables.fetch_add(1, Ordering::Relaxed);
        INTERRUPTS_ENABLED.with(|c| c.set(false));
    }

    unsafe fn enable_interrupts(&self) {
        INTERRUPTS_ENABLED.with(|c| c.set(true));
    }

    fn relax(&self) {
        std::thread::yield_now();
    }
}

// --- Interrupções ---

pub struct MockInterrupts {
    handlers: Mutex<Vec<(u8, &'static dyn IrqHandler)>>,
    registrations: AtomicU32,
}

impl MockInterrupts {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            registrations: AtomicU32::new(0),
        }
    }

    pub fn registrations(&self) -> u32 {
        self.registrations.load(Ordering::Relaxed)
    }

    pub fn handler(&self, vector: u8) -> Option<&'static dyn IrqHandler> {
        self.handlers
            .lock()
            .iter()
            .find(|(v, _)| *v == vector)
            .map(|(_, h)| *h)
    }

    /// Simula a chegada de `vector` na thread atual.
    pub fn fire(&self, vector: u8) {
        // Fora do lock: o handler pode registrar outros vetores
        if let Some(handler) = self.handler(vector) {
            handler.handle_irq(vector);
        }
    }
}

impl InterruptDispatch for MockInterrupts {
    fn register_interrupt_handler(
        &self,
        vector: u8,
        handler: &'static dyn IrqHandler,
    ) -> KResult<()> {
        let mut handlers = self.handlers.lock();
        handlers.retain(|(v, _)| *v != vector);
        handlers.push((vector, handler));
        self.registrations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// --- Memória ---

const STACK_POOL_BYTES: usize = 2 * 1024 * 1024;

pub struct MockMemory {
    mmio: Mutex<Vec<(u64, MmioWindow)>>,
    fail_mmio: AtomicBool,
    /// `(phys, size, endereço do buffer)`; buffers vazam e seguem legíveis
    regions: Mutex<Vec<(u64, usize, usize)>>,
    unmapped: Mutex<Vec<u64>>,
    fail_regions: AtomicBool,
    stacks: StackPool,
    stack_limit: AtomicU64,
    stacks_allocated: AtomicU64,
    stacks_freed: AtomicU64,
}

impl MockMemory {
    pub fn new() -> Self {
        let buf: &'static mut [u64] =
            Box::leak(alloc::vec![0u64; STACK_POOL_BYTES / 8].into_boxed_slice());
        let stacks = StackPool::empty();
        unsafe { stacks.init(buf.as_mut_ptr() as *mut u8, STACK_POOL_BYTES) };
        Self {
            mmio: Mutex::new(Vec::new()),
            fail_mmio: AtomicBool::new(false),
            regions: Mutex::new(Vec::new()),
            unmapped: Mutex::new(Vec::new()),
            fail_regions: AtomicBool::new(false),
            stacks,
            stack_limit: AtomicU64::new(u64::MAX),
            stacks_allocated: AtomicU64::new(0),
            stacks_freed: AtomicU64::new(0),
        }
    }

    pub fn fail_mmio(&self) {
        self.fail_mmio.store(true, Ordering::Relaxed);
    }

    pub fn fail_regions(&self) {
        self.fail_regions.store(true, Ordering::Relaxed);
    }

    /// Apenas as `n` primeiras stacks são entregues.
    pub fn fail_stacks_after(&self, n: u64) {
        self.stack_limit.store(n, Ordering::Relaxed);
    }

    pub fn stacks_allocated(&self) -> u64 {
        self.stacks_allocated.load(Ordering::Relaxed)
    }

    pub fn stacks_freed(&self) -> u64 {
        self.stacks_freed.load(Ordering::Relaxed)
    }

    /// Bytes livres no `StackPool` que atende `allocate_kernel_stack`.
    pub fn stack_pool_free_bytes(&self) -> usize {
        self.stacks.free_bytes()
    }

    /// Endereços físicos das regiões desmapeadas, em ordem.
    pub fn unmapped(&self) -> Vec<u64> {
        self.unmapped.lock().clone()
    }

    /// Tamanho pedido para a região identity-mapped em `phys`.
    pub fn region_size(&self, phys: u64) -> Option<usize> {
        self.regions
            .lock()
            .iter()
            .find(|(p, _, _)| *p == phys)
            .map(|(_, size, _)| *size)
    }

    /// Bytes da região identity-mapped em `phys` (mesmo após `unmap`).
    pub fn region_snapshot(&self, phys: u64) -> Vec<u8> {
        let regions = self.regions.lock();
        let Some((_, size, addr)) = regions.iter().find(|(p, _, _)| *p == phys) else {
            return Vec::new();
        };
        unsafe { ::core::slice::from_raw_parts(*addr as *const u8, *size).to_vec() }
    }

    /// Cópia dos bytes da janela MMIO mapeada em `phys`.
    pub fn mmio_snapshot(&self, phys: u64) -> Vec<u8> {
        let mmio = self.mmio.lock();
        let Some((_, window)) = mmio.iter().find(|(p, _)| *p == phys) else {
            return Vec::new();
        };
        unsafe { ::core::slice::from_raw_parts(window.base().as_ptr(), window.len()).to_vec() }
    }
}

impl MemoryManager for MockMemory {
    fn allocate_identity_mapped_region(&self, phys: u64, size: usize) -> KResult<IdentityRegion> {
        if self.fail_regions.load(Ordering::Relaxed) {
            return Err(KernelError::AllocationFailure);
        }
        let buf: &'static mut [u64] =
            Box::leak(alloc::vec![0u64; size.div_ceil(8)].into_boxed_slice());
        let virt = NonNull::new(buf.as_mut_ptr() as *mut u8).ok_or(KernelError::AllocationFailure)?;
        self.regions.lock().push((phys, size, virt.as_ptr() as usize));
        Ok(unsafe { IdentityRegion::new(phys, virt, size) })
    }

    fn unmap(&self, region: IdentityRegion) {
        self.unmapped.lock().push(region.phys());
    }

    fn allocate_kernel_stack(&self, size: usize) -> KResult<KernelStack> {
        if self.stacks_allocated() >= self.stack_limit.load(Ordering::Relaxed) {
            return Err(KernelError::AllocationFailure);
        }
        let stack = self.stacks.allocate(size)?;
        self.stacks_allocated.fetch_add(1, Ordering::Relaxed);
        Ok(stack)
    }

    fn free_kernel_stack(&self, stack: KernelStack) {
        self.stacks.free(stack);
        self.stacks_freed.fetch_add(1, Ordering::Relaxed);
    }

    fn map_mmio(&self, phys: u64, size: usize) -> KResult<MmioWindow> {
        if self.fail_mmio.load(Ordering::Relaxed) {
            return Err(KernelError::AllocationFailure);
        }
        let mut mmio = self.mmio.lock();
        if let Some((_, window)) = mmio.iter().find(|(p, _)| *p == phys) {
            return Ok(*window);
        }
        let window = mmio_buffer(size);
        mmio.push((phys, window));
        Ok(window)
    }
}

// --- Portas ---

const CMOS_INDEX: u16 = 0x70;
const CMOS_DATA: u16 = 0x71;
const COM1_DATA: u16 = 0x3F8;
const COM1_LINE_STATUS: u16 = 0x3FD;

pub struct MockPorts {
    writes: Mutex<Vec<(u16, u8)>>,
    cmos: Mutex<[u8; 128]>,
    cmos_index: AtomicU32,
    serial: Mutex<Vec<u8>>,
}

impl MockPorts {
    pub fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            cmos: Mutex::new([0; 128]),
            cmos_index: AtomicU32::new(0),
            serial: Mutex::new(Vec::new()),
        }
    }

    /// Todas as escritas de porta, em ordem.
    pub fn writes(&self) -> Vec<(u16, u8)> {
        self.writes.lock().clone()
    }

    pub fn cmos(&self, reg: u8) -> u8 {
        self.cmos.lock()[(reg & 0x7F) as usize]
    }

    pub fn set_cmos(&self, reg: u8, value: u8) {
        self.cmos.lock()[(reg & 0x7F) as usize] = value;
    }

    /// Bytes transmitidos pela COM1.
    pub fn serial_output(&self) -> String {
        String::from_utf8_lossy(&self.serial.lock()).into_owned()
    }
}

impl PortIo for MockPorts {
    fn inb(&self, port: u16) -> u8 {
        match port {
            CMOS_DATA => {
                let index = self.cmos_index.load(Ordering::Relaxed) as usize;
                self.cmos.lock()[index]
            }
            // THR vazio
            COM1_LINE_STATUS => 0x20,
            _ => 0,
        }
    }

    fn outb(&self, port: u16, value: u8) {
        self.writes.lock().push((port, value));
        match port {
            CMOS_INDEX => self.cmos_index.store((value & 0x7F) as u32, Ordering::Relaxed),
            CMOS_DATA => {
                let index = self.cmos_index.load(Ordering::Relaxed) as usize;
                self.cmos.lock()[index] = value;
            }
            COM1_DATA => self.serial.lock().push(value),
            _ => {}
        }
    }
}

// --- Timers ---

const MOCK_TIMER_MAX_FREQUENCY: u64 = 1_000_000;

pub struct MockTimer {
    vector: u8,
    capabilities: TimerCapabilities,
    counter: Option<&'static dyn PreciseCounter>,
    periodic: AtomicBool,
    frequency: AtomicU64,
    disabled: AtomicBool,
    acks: AtomicU64,
}

impl MockTimer {
    fn with(vector: u8, capabilities: TimerCapabilities) -> Self {
        Self {
            vector,
            capabilities,
            counter: None,
            periodic: AtomicBool::new(false),
            frequency: AtomicU64::new(0),
            disabled: AtomicBool::new(false),
            acks: AtomicU64::new(0),
        }
    }

    pub fn periodic(vector: u8) -> Self {
        Self::with(vector, TimerCapabilities::PERIODIC)
    }

    pub fn one_shot(vector: u8) -> Self {
        Self::with(vector, TimerCapabilities::empty())
    }

    pub fn precise(mut self, counter: &'static dyn PreciseCounter) -> Self {
        self.capabilities |= TimerCapabilities::PRECISE_QUERY;
        self.counter = Some(counter);
        self
    }

    pub fn per_cpu(mut self) -> Self {
        self.capabilities |= TimerCapabilities::PER_CPU;
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    pub fn acks(&self) -> u64 {
        self.acks.load(Ordering::Relaxed)
    }
}

impl HardwareTimer for MockTimer {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn kind(&self) -> TimerKind {
        if self.capabilities.contains(TimerCapabilities::PER_CPU) {
            TimerKind::LocalApic
        } else if self.counter.is_some() {
            TimerKind::HpetComparator
        } else {
            TimerKind::Pit
        }
    }

    fn capabilities(&self) -> TimerCapabilities {
        self.capabilities
    }

    fn interrupt_vector(&self) -> u8 {
        self.vector
    }

    fn is_periodic(&self) -> bool {
        self.periodic.load(Ordering::Acquire)
    }

    fn set_periodic(&self) {
        self.periodic.store(true, Ordering::Release);
    }

    fn set_non_periodic(&self) {
        self.periodic.store(false, Ordering::Release);
    }

    fn disable(&self) {
        self.disabled.store(true, Ordering::Release);
    }

    fn frequency(&self) -> u64 {
        self.frequency.load(Ordering::Acquire)
    }

    fn is_capable_of_frequency(&self, frequency: u64) -> bool {
        (1..=MOCK_TIMER_MAX_FREQUENCY).contains(&frequency)
    }

    fn calculate_nearest_possible_frequency(&self, frequency: u64) -> u64 {
        frequency.clamp(1, MOCK_TIMER_MAX_FREQUENCY)
    }

    fn try_to_set_frequency(&self, frequency: u64) -> KResult<u64> {
        if !self.is_capable_of_frequency(frequency) {
            return Err(KernelError::InvalidArgument);
        }
        self.frequency.store(frequency, Ordering::Release);
        self.disabled.store(false, Ordering::Release);
        Ok(frequency)
    }

    fn acknowledge(&self) {
        self.acks.fetch_add(1, Ordering::Relaxed);
    }

    fn precise_counter(&self) -> Option<&'static dyn PreciseCounter> {
        self.counter
    }
}

/// Contador livre de 64 bits controlado pelo teste.
pub struct MockCounter {
    frequency: u64,
    counter: AtomicU64,
    last: AtomicU64,
}

impl MockCounter {
    pub fn new(frequency: u64) -> Self {
        Self {
            frequency,
            counter: AtomicU64::new(0),
            last: AtomicU64::new(0),
        }
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn advance(&self, ticks: u64) {
        self.counter.fetch_add(ticks, Ordering::AcqRel);
    }
}

impl PreciseCounter for MockCounter {
    fn ticks_per_second(&self) -> u64 {
        self.frequency
    }

    fn update_time(&self, seconds: &mut u64, ticks: &mut u32, query_only: bool) -> u64 {
        let current = self.counter.load(Ordering::Acquire);
        let last = self.last.load(Ordering::Acquire);
        let delta = current.wrapping_sub(last);

        let total = *ticks as u64 + delta;
        *seconds += total / self.frequency;
        *ticks = (total % self.frequency) as u32;

        if !query_only {
            self.last.store(current, Ordering::Release);
        }
        ((delta as u128 * 1_000_000_000) / self.frequency as u128) as u64
    }
}

// --- Scheduler ---

pub struct MockScheduler {
    ticks: AtomicU64,
    profile_ticks: AtomicU64,
    idle_created: AtomicU32,
    fail_idle: AtomicBool,
}

impl MockScheduler {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            profile_ticks: AtomicU64::new(0),
            idle_created: AtomicU32::new(0),
            fail_idle: AtomicBool::new(false),
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn profile_ticks(&self) -> u64 {
        self.profile_ticks.load(Ordering::Relaxed)
    }

    pub fn idle_created(&self) -> u32 {
        self.idle_created.load(Ordering::Relaxed)
    }

    pub fn fail_idle(&self) {
        self.fail_idle.store(true, Ordering::Relaxed);
    }
}

impl SchedulerHooks for MockScheduler {
    fn create_idle_thread(&self, cpu: u32) -> KResult<ThreadHandle> {
        if self.fail_idle.load(Ordering::Relaxed) {
            return Err(KernelError::AllocationFailure);
        }
        self.idle_created.fetch_add(1, Ordering::Relaxed);
        Ok(0x1000 + cpu as u64)
    }

    fn timer_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    fn profile_tick(&self) {
        self.profile_ticks.fetch_add(1, Ordering::Relaxed);
    }

    fn enter_idle(&self, cpu: u32) -> ! {
        panic!("CPU {} entrou no loop idle", cpu);
    }
}
