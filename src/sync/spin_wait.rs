//! Esperas por polling e hook de diagnóstico.
//!
//! Todas as esperas do bring-up são busy-polls com atraso fixo e sem prazo.
//! Um `PollHook` opcional observa cada iteração (útil para detectar um AP
//! travado ou um APIC que nunca limpa o bit de pending), mas não altera o
//! comportamento: a espera continua ilimitada.

use spin::Once;

/// Ponto de espera observado.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinSite {
    /// BSP/CPU aguardando o bit delivery-pending do ICR limpar
    IcrPending,
    /// BSP aguardando todos os APs sinalizarem prontidão
    ApReady,
    /// AP aguardando a liberação do BSP
    ApContinue,
}

/// Observador chamado a cada iteração: `(site, iteração)`.
pub type PollHook = fn(SpinSite, u64);

/// Slot de hook instalável uma única vez.
pub struct PollObserver {
    hook: Once<PollHook>,
}

impl PollObserver {
    pub const fn new() -> Self {
        Self { hook: Once::new() }
    }

    /// Instala o hook. Retorna `false` se já havia um.
    pub fn install(&self, hook: PollHook) -> bool {
        let mut installed = false;
        self.hook.call_once(|| {
            installed = true;
            hook
        });
        installed
    }

    #[inline]
    pub fn observe(&self, site: SpinSite, iteration: u64) {
        if let Some(hook) = self.hook.get() {
            hook(site, iteration);
        }
    }
}

impl Default for PollObserver {
    fn default() -> Self {
        Self::new()
    }
}

/// Faz polling até `done()` retornar true, chamando `pause()` entre tentativas.
///
/// Retorna o número de verificações feitas (sempre >= 1). Não há timeout.
pub fn spin_until(
    mut done: impl FnMut() -> bool,
    mut pause: impl FnMut(),
    observer: &PollObserver,
    site: SpinSite,
) -> u64 {
    let mut checks = 0u64;
    loop {
        checks += 1;
        if done() {
            return checks;
        }
        observer.observe(site, checks);
        pause();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::core::sync::atomic::{AtomicU64, Ordering};

    static OBSERVED: AtomicU64 = AtomicU64::new(0);

    fn count_hook(site: SpinSite, _iteration: u64) {
        if site == SpinSite::ApReady {
            OBSERVED.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_spin_until_counts_checks() {
        let observer = PollObserver::new();
        let mut remaining = 3;
        let mut pauses = 0;
        let checks = spin_until(
            || {
                if remaining == 0 {
                    true
                } else {
                    remaining -= 1;
                    false
                }
            },
            || pauses += 1,
            &observer,
            SpinSite::IcrPending,
        );
        assert_eq!(checks, 4);
        assert_eq!(pauses, 3);
    }

    #[test]
    fn test_hook_observes_iterations() {
        let observer = PollObserver::new();
        assert!(observer.install(count_hook));
        assert!(!observer.install(count_hook));
        let mut n = 0;
        spin_until(
            || {
                n += 1;
                n > 2
            },
            || {},
            &observer,
            SpinSite::ApReady,
        );
        assert_eq!(OBSERVED.load(Ordering::Relaxed), 2);
    }
}
