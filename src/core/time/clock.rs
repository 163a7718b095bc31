/// Arquivo: core/time/clock.rs
///
/// Propósito: Relógio do sistema (tempo desde o boot + época).
/// Tempo monotônico = `seconds_since_boot` + `ticks_this_second`; tempo real
/// (Wall Clock) = época + monotônico.
///
/// Detalhes de Implementação:
/// - Estado num `SeqLock`: leitores nunca bloqueiam, o escritor é o
///   handler do time-keeper.
/// - Ajustes de relógio (adjtime) são drenados aos poucos: no máximo 1% do
///   tempo decorrido por tick.
/// - Em modo preciso a leitura consulta o contador livre (HPET) dentro da
///   janela do seqlock.
use crate::drivers::timer::{PreciseCounter, TickPeriod};
use crate::sync::SeqLock;

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Fração máxima do tempo decorrido que pode ser corrigida por tick (1/100).
const SLEW_DIVISOR: u64 = 100;

/// `struct timespec` (layout C, exposto na TimePage).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeSpec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

impl TimeSpec {
    pub const ZERO: Self = Self {
        tv_sec: 0,
        tv_nsec: 0,
    };

    /// Normaliza `tv_nsec` para `[0, 1e9)`.
    pub const fn new(tv_sec: i64, tv_nsec: i64) -> Self {
        let carry = tv_nsec.div_euclid(NANOS_PER_SECOND);
        Self {
            tv_sec: tv_sec.wrapping_add(carry),
            tv_nsec: tv_nsec.rem_euclid(NANOS_PER_SECOND),
        }
    }

    pub const fn from_seconds(seconds: i64) -> Self {
        Self::new(seconds, 0)
    }

    pub const fn add(self, other: Self) -> Self {
        Self::new(
            self.tv_sec.wrapping_add(other.tv_sec),
            self.tv_nsec + other.tv_nsec,
        )
    }

    pub const fn add_nanos(self, nanos: i64) -> Self {
        Self::new(self.tv_sec, self.tv_nsec + nanos % NANOS_PER_SECOND)
            .add(Self::from_seconds(nanos / NANOS_PER_SECOND))
    }

    pub const fn as_nanos(self) -> i128 {
        self.tv_sec as i128 * NANOS_PER_SECOND as i128 + self.tv_nsec as i128
    }

    pub const fn as_millis(self) -> i64 {
        self.tv_sec.wrapping_mul(1000) + self.tv_nsec / 1_000_000
    }
}

/// Relógios POSIX expostos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ClockId {
    Realtime = 0,
    Monotonic = 1,
    MonotonicRaw = 2,
    RealtimeCoarse = 3,
    MonotonicCoarse = 4,
}

pub const CLOCK_ID_COUNT: usize = 5;

impl ClockId {
    pub const ALL: [ClockId; CLOCK_ID_COUNT] = [
        Self::Realtime,
        Self::Monotonic,
        Self::MonotonicRaw,
        Self::RealtimeCoarse,
        Self::MonotonicCoarse,
    ];

    pub fn precision(self) -> Precision {
        match self {
            Self::RealtimeCoarse | Self::MonotonicCoarse => Precision::Coarse,
            _ => Precision::Precise,
        }
    }

    pub fn is_realtime(self) -> bool {
        matches!(self, Self::Realtime | Self::RealtimeCoarse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// Granularidade do tick do time-keeper
    Coarse,
    /// Refinado pelo contador livre, se houver
    Precise,
}

/// Estado protegido pelo seqlock.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockData {
    pub seconds_since_boot: u64,
    pub ticks_this_second: u32,
    /// Tempo real correspondente ao boot
    pub epoch: TimeSpec,
    /// Correção ainda a aplicar (ns, com sinal)
    pub remaining_adjustment_ns: i64,
}

/// Relógio do sistema. Escritor único: `increment_time_since_boot` no
/// handler do time-keeper (e os setters, serializados pelo lock de escrita).
///
/// Os setters devem rodar com interrupções desabilitadas na CPU atual; o
/// handler do time-keeper escreve no mesmo seqlock.
pub struct TimeKeeping {
    /// Unidades de `ticks_this_second` por segundo
    ticks_per_second: u64,
    /// Unidades somadas a cada interrupção (sem contador preciso)
    ticks_per_interrupt: u64,
    precise: Option<&'static dyn PreciseCounter>,
    data: SeqLock<ClockData>,
}

impl TimeKeeping {
    /// `period` é o período exato de interrupção do time-keeper; com
    /// contador preciso, `TickPeriod::hertz` da frequência do contador.
    pub fn new(period: TickPeriod, precise: Option<&'static dyn PreciseCounter>) -> Self {
        Self {
            ticks_per_second: period.units_per_second.max(1),
            ticks_per_interrupt: period.units.max(1),
            precise,
            data: SeqLock::new(ClockData::default()),
        }
    }

    pub fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }

    pub fn can_query_precise_time(&self) -> bool {
        self.precise.is_some()
    }

    /// Nanossegundos por interrupção do time-keeper (truncado).
    pub fn nanos_per_tick(&self) -> u64 {
        TickPeriod {
            units: self.ticks_per_interrupt,
            units_per_second: self.ticks_per_second,
        }
        .as_nanos()
    }

    /// Avança o relógio de um tick do time-keeper e drena parte do ajuste.
    /// Retorna os nanossegundos decorridos.
    pub fn increment_time_since_boot(&self) -> u64 {
        let tps = self.ticks_per_second;
        let step = self.ticks_per_interrupt;
        let nanos_per_tick = self.nanos_per_tick();
        let precise = self.precise;
        self.data.write(|d| {
            let elapsed = match precise {
                Some(counter) => counter.update_time(
                    &mut d.seconds_since_boot,
                    &mut d.ticks_this_second,
                    false,
                ),
                None => {
                    // O resto da fração de segundo é carregado
                    let total = d.ticks_this_second as u64 + step;
                    d.seconds_since_boot += total / tps;
                    d.ticks_this_second = (total % tps) as u32;
                    nanos_per_tick
                }
            };

            let bound = (elapsed / SLEW_DIVISOR).min(i64::MAX as u64) as i64;
            let slew = d.remaining_adjustment_ns.clamp(-bound, bound);
            d.remaining_adjustment_ns -= slew;
            d.epoch = d.epoch.add_nanos(slew);
            elapsed
        })
    }

    fn to_timespec(&self, seconds: u64, ticks: u32) -> TimeSpec {
        let nanos = (ticks as u128 * NANOS_PER_SECOND as u128) / self.ticks_per_second as u128;
        TimeSpec::new(seconds as i64, nanos as i64)
    }

    /// `(seconds, ticks)` de `d`, refinados pelo contador livre se pedido.
    fn since_boot(&self, d: &ClockData, precision: Precision) -> (u64, u32) {
        let (mut seconds, mut ticks) = (d.seconds_since_boot, d.ticks_this_second);
        if let (Precision::Precise, Some(counter)) = (precision, self.precise) {
            counter.update_time(&mut seconds, &mut ticks, true);
        }
        (seconds, ticks)
    }

    /// Época e tempo desde o boot lidos na mesma janela do seqlock.
    fn read_time(&self, precision: Precision) -> (TimeSpec, TimeSpec) {
        let (epoch, seconds, ticks) = self.data.read_consistent(|d| {
            let (seconds, ticks) = self.since_boot(d, precision);
            (d.epoch, seconds, ticks)
        });
        (epoch, self.to_timespec(seconds, ticks))
    }

    /// Tempo desde o boot. Nunca decresce.
    pub fn monotonic_time(&self, precision: Precision) -> TimeSpec {
        self.read_time(precision).1
    }

    /// Tempo real (Unix).
    pub fn wall_clock_time(&self, precision: Precision) -> TimeSpec {
        let (epoch, monotonic) = self.read_time(precision);
        epoch.add(monotonic)
    }

    /// Define o tempo real atual. Descarta ajuste pendente.
    ///
    /// A época sai do tempo desde o boot lido dentro da própria escrita: um
    /// tick não pode cair entre a leitura e a publicação.
    pub fn set_wall_clock(&self, now: TimeSpec) {
        self.data.write(|d| {
            let (seconds, ticks) = self.since_boot(d, Precision::Precise);
            let monotonic = self.to_timespec(seconds, ticks);
            d.epoch = TimeSpec::new(
                now.tv_sec - monotonic.tv_sec,
                now.tv_nsec - monotonic.tv_nsec,
            );
            d.remaining_adjustment_ns = 0;
        });
        crate::kinfo!("(Time) Relógio definido, unix=", now.tv_sec);
    }

    pub fn remaining_epoch_time_adjustment(&self) -> i64 {
        self.data.read_consistent(|d| d.remaining_adjustment_ns)
    }

    pub fn set_remaining_epoch_time_adjustment(&self, nanos: i64) {
        self.data.write(|d| d.remaining_adjustment_ns = nanos);
    }

    /// Cópia do estado (diagnóstico e testes).
    pub fn snapshot(&self) -> ClockData {
        self.data.read()
    }

    pub fn uptime_ms(&self) -> u64 {
        self.monotonic_time(Precision::Coarse).as_millis().max(0) as u64
    }

    pub fn is_quiescent(&self) -> bool {
        self.data.is_quiescent()
    }
}
