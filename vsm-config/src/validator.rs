use std::fmt;

/// Result of checking a [`crate::SnapshotConfig`].
#[derive(Default, Debug)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
}

impl ValidationReport {
    /// Record a problem that makes the configuration unusable.
    pub fn add_error(&mut self, msg: String) {
        self.errors.push(msg);
    }

    /// Record something suspicious that still loads.
    pub fn add_warning(&mut self, msg: String) {
        self.warnings.push(msg);
    }

    /// Record a note about a setting that has no effect.
    pub fn add_info(&mut self, msg: String) {
        self.info.push(msg);
    }

    /// `true` when loading should be refused.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for error in &self.errors {
            writeln!(f, "❌ {}", error)?;
        }
        for warning in &self.warnings {
            writeln!(f, "⚠️  {}", warning)?;
        }
        for info in &self.info {
            writeln!(f, "ℹ️  {}", info)?;
        }
        Ok(())
    }
}
