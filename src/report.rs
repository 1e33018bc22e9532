//! Recoverable problems collected during a remapping run.

use serde::Serialize;

use crate::classfile::ClassFormatError;
use crate::descriptor::DescriptorError;

/// The kind of a recoverable problem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    /// A descriptor or signature could not be parsed; the reference was left
    /// unchanged.
    MalformedDescriptor {
        /// The offending text.
        descriptor: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A class entry could not be parsed or written; it was left out of the
    /// output.
    MalformedClassStructure {
        /// Why the class was rejected.
        reason: String,
    },
    /// The ancestry of a class loops back onto itself.
    HierarchyCycle {
        /// A class on the cycle.
        class: String,
    },
}

impl From<&DescriptorError> for IssueKind {
    fn from(error: &DescriptorError) -> Self {
        Self::MalformedDescriptor {
            descriptor: error.descriptor().to_owned(),
            reason: error.reason().to_owned(),
        }
    }
}

impl From<&ClassFormatError> for IssueKind {
    fn from(error: &ClassFormatError) -> Self {
        Self::MalformedClassStructure {
            reason: error.to_string(),
        }
    }
}

/// A recoverable problem, optionally tied to an archive entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// Path of the entry the issue was found in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    /// What went wrong.
    #[serde(flatten)]
    pub kind: IssueKind,
}

/// Summary of a remapping run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RemapReport {
    /// Number of classes that were rewritten.
    pub classes_rewritten: usize,
    /// Number of entries copied without class rewriting.
    pub entries_copied: usize,
    /// Recoverable problems, in the order they were found.
    pub issues: Vec<Issue>,
}

impl RemapReport {
    /// Records an issue.
    pub fn push(&mut self, entry: Option<&str>, kind: IssueKind) {
        self.issues.push(Issue {
            entry: entry.map(str::to_owned),
            kind,
        });
    }

    /// Whether the run finished without any issue.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Number of entries that were dropped as malformed.
    pub fn malformed_classes(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| matches!(issue.kind, IssueKind::MalformedClassStructure { .. }))
            .count()
    }

    /// Serializes the report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
