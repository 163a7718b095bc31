//! Framework de testes do kernel
//!
//! Suites executadas no próprio hardware durante o boot (feature
//! `self_test`). Cada caso recebe o estado sob teste por referência.

/// Resultado de teste
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestResult {
    Pass,
    Fail,
    Skip,
}

/// Um caso de teste
pub struct TestCase<C: ?Sized> {
    pub name: &'static str,
    pub func: fn(&C) -> TestResult,
}

impl<C: ?Sized> TestCase<C> {
    pub const fn new(name: &'static str, func: fn(&C) -> TestResult) -> Self {
        Self { name, func }
    }
}

/// Contagem de uma suite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuiteSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl SuiteSummary {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Executa suite de testes
pub fn run_test_suite<C: ?Sized>(name: &str, subject: &C, tests: &[TestCase<C>]) -> SuiteSummary {
    crate::klog!("=== Executando suite: ");
    crate::klog!(name);
    crate::knl!();

    let mut summary = SuiteSummary::default();
    for test in tests {
        let label = match (test.func)(subject) {
            TestResult::Pass => {
                summary.passed += 1;
                "  [PASS] "
            }
            TestResult::Fail => {
                summary.failed += 1;
                "  [FAIL] "
            }
            TestResult::Skip => {
                summary.skipped += 1;
                "  [SKIP] "
            }
        };
        crate::klog!(label);
        crate::klog!(test.name);
        crate::knl!();
    }

    if summary.all_passed() {
        crate::kok!("Suite concluída, passed=", summary.passed);
    } else {
        crate::kfail!("Suite com falhas, failed=", summary.failed);
    }
    summary
}
