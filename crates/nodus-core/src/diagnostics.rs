use serde::{Deserialize, Serialize};

use crate::id::DefId;

/// Severity of a recoverable construction-time diagnostic, as opposed to the
/// hard [`crate::error::CoreError`] contract violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// The def substituted with `Bottom` so construction could continue,
    /// if any.
    pub bottom_at: Option<DefId>,
}

/// Sink for the "unknown symbol / unbound name" class of frontend error:
/// rather than aborting construction, the caller records a diagnostic and is
/// handed a `Bottom` of the expected type to keep building.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            bottom_at: None,
        });
    }

    pub fn unbound_name(&mut self, name: &str, substituted_bottom: DefId) {
        self.entries.push(Diagnostic {
            severity: Severity::Error,
            message: format!("unbound name `{name}`"),
            bottom_at: Some(substituted_bottom),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_name_records_error_with_bottom() {
        let mut diags = Diagnostics::new();
        diags.unbound_name("foo", DefId(3));
        assert!(diags.has_errors());
        assert_eq!(diags.iter().count(), 1);
    }
}
