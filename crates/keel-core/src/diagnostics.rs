use std::sync::Mutex;

/// Collects problems raised during one orchestrator cycle. Errors abort the
/// cycle at the next phase boundary; warnings (per-package failures inside
/// parallel groups) are carried for reporting but let siblings continue.
#[derive(Debug, Default)]
pub struct DiagnosticsScope {
    errors: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl DiagnosticsScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(error = %message, "workspace_error");
        self.errors.lock().expect("diagnostics poisoned").push(message);
    }

    pub fn report_warning(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(warning = %message, "workspace_warning");
        self.warnings
            .lock()
            .expect("diagnostics poisoned")
            .push(message);
    }

    #[must_use]
    pub fn errors_reported(&self) -> bool {
        !self.errors.lock().expect("diagnostics poisoned").is_empty()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().expect("diagnostics poisoned").clone()
    }

    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().expect("diagnostics poisoned").clone()
    }

    /// Reset between cycles so a stale error does not abort the next run.
    pub fn reset(&self) {
        self.errors.lock().expect("diagnostics poisoned").clear();
        self.warnings.lock().expect("diagnostics poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_flip_the_reported_flag() {
        let scope = DiagnosticsScope::new();
        assert!(!scope.errors_reported());
        scope.report_warning("slow fetch for lib");
        assert!(!scope.errors_reported(), "warnings must not abort");
        scope.report_error("resolved file is corrupt");
        assert!(scope.errors_reported());
        assert_eq!(scope.errors().len(), 1);
        assert_eq!(scope.warnings().len(), 1);
    }

    #[test]
    fn reset_clears_both_channels() {
        let scope = DiagnosticsScope::new();
        scope.report_error("boom");
        scope.report_warning("meh");
        scope.reset();
        assert!(!scope.errors_reported());
        assert!(scope.warnings().is_empty());
    }
}
