//! Handshake de duas fases entre BSP e APs.
//!
//! ```text
//!  AP:   long mode ── signal_ready() ── wait_for_continue() ── TLB flush ── enable
//!  BSP:  IPIs ── wait_for_all_ready() ── unmap trampoline ── IPIs globais ── release()
//! ```
//!
//! Nenhum AP passa de `wait_for_continue` antes de o BSP terminar de mexer
//! no estado compartilhado (região do trampoline, MM). As esperas não têm
//! prazo: um AP que nunca chega prende o boot.

use ::core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::sync::spin_wait::{spin_until, PollHook, PollObserver, SpinSite};
use crate::sys::{KResult, KernelError};

pub struct Handshake {
    /// APs esperados (`enabled_processors - 1`)
    expected: AtomicU32,
    ap_ready_count: AtomicU32,
    continue_flag: AtomicBool,
    poll: PollObserver,
}

impl Handshake {
    pub const fn new() -> Self {
        Self {
            expected: AtomicU32::new(0),
            ap_ready_count: AtomicU32::new(0),
            continue_flag: AtomicBool::new(false),
            poll: PollObserver::new(),
        }
    }

    /// Define quantos APs o BSP vai esperar. Chamado antes dos IPIs.
    pub fn arm(&self, ap_count: u32) {
        self.expected.store(ap_count, Ordering::Release);
    }

    pub fn expected(&self) -> u32 {
        self.expected.load(Ordering::Acquire)
    }

    pub fn ready_count(&self) -> u32 {
        self.ap_ready_count.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.continue_flag.load(Ordering::Acquire)
    }

    pub fn install_poll_hook(&self, hook: PollHook) -> bool {
        self.poll.install(hook)
    }

    /// Lado do AP: anuncia que chegou ao long mode. Retorna a posição de
    /// chegada (1..=N). Um sinal além do esperado é violação de protocolo.
    pub fn signal_ready(&self) -> KResult<u32> {
        let arrived = self.ap_ready_count.fetch_add(1, Ordering::AcqRel) + 1;
        if arrived > self.expected() {
            crate::kerror!("(SMP) Sinal de prontidão excedente: ", arrived);
            return Err(KernelError::ProtocolViolation);
        }
        Ok(arrived)
    }

    /// Lado do BSP: espera todos os APs. Retorna o número de verificações.
    pub fn wait_for_all_ready(&self, pause: impl FnMut()) -> u64 {
        let expected = self.expected();
        spin_until(
            || self.ready_count() >= expected,
            pause,
            &self.poll,
            SpinSite::ApReady,
        )
    }

    /// Lado do BSP: libera os APs. Escrito uma única vez.
    pub fn release(&self) {
        self.continue_flag.store(true, Ordering::Release);
    }

    /// Lado do AP: espera a liberação do BSP.
    pub fn wait_for_continue(&self, pause: impl FnMut()) -> u64 {
        spin_until(
            || self.is_released(),
            pause,
            &self.poll,
            SpinSite::ApContinue,
        )
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use std::thread;

    /// Simula o BSP com N APs: o "unmap" registra quantos sinais já haviam
    /// chegado e nenhum AP pode passar do continue antes dele.
    fn run(n: u32) {
        let handshake = Arc::new(Handshake::new());
        handshake.arm(n);
        let unmapped_after = Arc::new(AtomicU32::new(u32::MAX));

        let aps: alloc::vec::Vec<_> = (0..n)
            .map(|i| {
                let hs = handshake.clone();
                let unmapped = unmapped_after.clone();
                thread::spawn(move || {
                    for _ in 0..(i * 7) % 5 {
                        thread::yield_now();
                    }
                    hs.signal_ready().unwrap();
                    hs.wait_for_continue(thread::yield_now);
                    // A liberação só acontece após o unmap
                    assert_eq!(unmapped.load(Ordering::Acquire), n);
                })
            })
            .collect();

        handshake.wait_for_all_ready(thread::yield_now);
        unmapped_after.store(handshake.ready_count(), Ordering::Release);
        handshake.release();

        for ap in aps {
            ap.join().unwrap();
        }
        assert_eq!(handshake.ready_count(), n);
    }

    #[test]
    fn test_unmap_ordered_after_last_signal() {
        for n in 1..=8 {
            run(n);
        }
    }

    #[test]
    fn test_excess_signal_is_violation() {
        let handshake = Handshake::new();
        handshake.arm(1);
        assert_eq!(handshake.signal_ready(), Ok(1));
        assert_eq!(handshake.signal_ready(), Err(KernelError::ProtocolViolation));
    }

    #[test]
    fn test_zero_aps_returns_immediately() {
        let handshake = Handshake::new();
        handshake.arm(0);
        assert_eq!(handshake.wait_for_all_ready(|| panic!("não deveria esperar")), 1);
    }
}
