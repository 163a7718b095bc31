/// Arquivo: core/boot/cmdline.rs
///
/// Propósito: Parser da Linha de Comando do Kernel.
/// Extrai as opções que afetam o bring-up SMP e a seleção de timers
/// (ex: "smp=off", "apic=off", "time=legacy", "hpet=nonperiodic").
///
/// Detalhes de Implementação:
/// - Armazenamento em buffer fixo (sem heap) para estar disponível muito cedo no boot.
/// - Parser simples de chave=valor separados por espaços.
/// - Chave sem `=` é uma flag (`get` retorna `Some("")`).
/// - Em chaves repetidas vale a última ocorrência.

/// Tamanho máximo da linha de comando
const CMDLINE_MAX_LEN: usize = 256;

#[derive(Clone)]
pub struct CommandLine {
    buffer: [u8; CMDLINE_MAX_LEN],
    len: usize,
}

impl CommandLine {
    pub const fn new() -> Self {
        Self {
            buffer: [0; CMDLINE_MAX_LEN],
            len: 0,
        }
    }

    /// Copia a linha de comando fornecida pelo bootloader (truncada em
    /// `CMDLINE_MAX_LEN`, sem quebrar caractere UTF-8).
    pub fn parse(args: &str) -> Self {
        let mut cmdline = Self::new();
        let mut len = args.len().min(CMDLINE_MAX_LEN);
        while !args.is_char_boundary(len) {
            len -= 1;
        }
        cmdline.buffer[..len].copy_from_slice(&args.as_bytes()[..len]);
        cmdline.len = len;
        if len < args.len() {
            crate::kwarn!("(Boot) Linha de comando truncada em ", len);
        }
        cmdline
    }

    pub fn as_str(&self) -> &str {
        // Cópia de um &str cortada em fronteira de caractere
        ::core::str::from_utf8(&self.buffer[..self.len]).unwrap_or("")
    }

    /// Verifica se uma flag (chave sem valor) ou parâmetro existe.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Obtém o valor de um parâmetro (ex: "time" -> "legacy").
    /// Se for flag ("debug"), retorna `Some("")`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.as_str()
            .split_ascii_whitespace()
            .filter_map(|arg| {
                let (name, value) = arg.split_once('=').unwrap_or((arg, ""));
                (name == key).then_some(value)
            })
            .last()
    }
}

impl Default for CommandLine {
    fn default() -> Self {
        Self::new()
    }
}

/// Opções de boot do núcleo SMP/Tempo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// `smp=off`: não iniciar APs
    pub smp: bool,
    /// `apic=off`: não usar o Local APIC (implica sem SMP e sem timer do APIC)
    pub apic: bool,
    /// `time=legacy`: ignorar o HPET e usar PIT + RTC
    pub legacy_time: bool,
    /// `hpet=nonperiodic`: comparadores só em modo one-shot
    pub allow_periodic_hpet: bool,
    /// `profile`: timer de profile ativo desde o boot
    pub profiling: bool,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            smp: true,
            apic: true,
            legacy_time: false,
            allow_periodic_hpet: true,
            profiling: false,
        }
    }
}

impl BootConfig {
    pub fn from_cmdline(cmdline: &CommandLine) -> Self {
        let mut config = Self::default();
        if cmdline.get("smp") == Some("off") {
            config.smp = false;
        }
        if cmdline.get("apic") == Some("off") {
            config.apic = false;
            config.smp = false;
        }
        if cmdline.get("time") == Some("legacy") {
            config.legacy_time = true;
        }
        match cmdline.get("hpet") {
            Some("nonperiodic") => config.allow_periodic_hpet = false,
            Some("periodic") | None => {}
            Some(_) => crate::kwarn!("(Boot) Valor de hpet= desconhecido"),
        }
        if cmdline.has("profile") {
            config.profiling = true;
        }
        config
    }
}
