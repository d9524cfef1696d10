use std::fmt;

use crate::attributes::Attribute;

/// What a validation message is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorField {
    /// The record as a whole, e.g. a failed backend call.
    Base,
    Attribute(Attribute),
}

/// Errors recorded on a [`Snapshot`](crate::Snapshot) by its last operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    entries: Vec<(ErrorField, String)>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: ErrorField, message: impl Into<String>) {
        self.entries.push((field, message.into()));
    }

    pub fn add_base(&mut self, message: impl Into<String>) {
        self.add(ErrorField::Base, message);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Messages recorded for `field`, in insertion order.
    pub fn on(&self, field: ErrorField) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(f, _)| *f == field)
            .map(|(_, m)| m.as_str())
            .collect()
    }

    /// Messages prefixed with their attribute's label. Base messages are
    /// returned as-is.
    pub fn full_messages(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(field, message)| match field {
                ErrorField::Base => message.clone(),
                ErrorField::Attribute(attr) => format!("{} {}", attr.human_name(), message),
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ErrorField, &str)> {
        self.entries.iter().map(|(f, m)| (*f, m.as_str()))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_messages().join("; "))
    }
}
