//! Remapping of complete archives.

use std::collections::HashMap;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classfile::{ClassFile, ClassFormatError};
use crate::config::RemapConfig;
use crate::descriptor::DescriptorError;
use crate::hierarchy::{ClassEntry, HierarchyBuilder};
use crate::manifest::{rewrite_manifest, MANIFEST_PATH};
use crate::mapping::{MappingError, MappingRecord, MappingTable};
use crate::report::{IssueKind, RemapReport};
use crate::resolver::SymbolResolver;
use crate::rewriter::ClassRewriter;

/// A file of an archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive, using `/` separators.
    pub path: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl ArchiveEntry {
    /// Creates an entry.
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }

    /// Whether the entry is a class file.
    pub fn is_class(&self) -> bool {
        self.path.ends_with(".class")
    }
}

/// The result of a successful run.
#[derive(Clone, Debug)]
pub struct RemapOutput {
    /// Output entries, in input order.
    pub entries: Vec<ArchiveEntry>,
    /// Recoverable problems found along the way.
    pub report: RemapReport,
}

impl RemapOutput {
    /// Whether every entry was processed without issue.
    pub fn is_success(&self) -> bool {
        self.report.is_clean()
    }
}

/// The kind of a [`RemapError`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RemapErrorKind {
    /// The mapping records are invalid or contradict each other.
    #[error("malformed mapping")]
    MalformedMapping(#[from] MappingError),
    /// Two entries would be written to the same path.
    #[error("`{first}` and `{second}` both map to `{path}`")]
    DuplicateOutputPath {
        /// The contested output path.
        path: String,
        /// The first input entry.
        first: String,
        /// The second input entry.
        second: String,
    },
}

/// A failed run.
///
/// No output is produced. The report holds the recoverable issues found
/// before the run was aborted.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct RemapError {
    kind: RemapErrorKind,
    report: RemapReport,
}

impl RemapError {
    fn new(kind: impl Into<RemapErrorKind>, report: RemapReport) -> Self {
        Self {
            kind: kind.into(),
            report,
        }
    }

    /// Returns the corresponding [`RemapErrorKind`] for this error.
    pub fn kind(&self) -> &RemapErrorKind {
        &self.kind
    }

    /// Issues collected before the run failed.
    pub fn report(&self) -> &RemapReport {
        &self.report
    }
}

/// Remaps archives with a fixed mapping table.
///
/// # Examples
///
/// ```
/// use remapper::{ArchiveEntry, MappingRecord, Remapper};
///
/// let remapper = Remapper::from_records([MappingRecord::class("a", "com/example/App")]).unwrap();
/// let output = remapper
///     .remap(vec![ArchiveEntry::new("notes.txt", b"hello".to_vec())])
///     .unwrap();
/// assert_eq!(output.entries[0].bytes, b"hello");
/// assert!(output.is_success());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Remapper {
    mappings: MappingTable,
    config: RemapConfig,
    context: Vec<ClassEntry>,
}

impl Remapper {
    /// Creates a remapper with the default configuration.
    pub fn new(mappings: MappingTable) -> Self {
        Self {
            mappings,
            ..Default::default()
        }
    }

    /// Creates a remapper from mapping records.
    pub fn from_records<I>(records: I) -> Result<Self, RemapError>
    where
        I: IntoIterator<Item = MappingRecord>,
    {
        MappingTable::from_records(records)
            .map(Self::new)
            .map_err(|error| RemapError::new(error, RemapReport::default()))
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: RemapConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds read-only classes that complete the hierarchy, such as library
    /// classes. They are never written.
    pub fn with_context_classes<I>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = ClassEntry>,
    {
        self.context.extend(classes);
        self
    }

    /// The mapping table.
    pub fn mappings(&self) -> &MappingTable {
        &self.mappings
    }

    /// Remaps all entries of an archive.
    ///
    /// Class entries are rewritten and moved to the path of their new name.
    /// Malformed classes are left out and reported. Fails without output if
    /// two entries would end up at the same path.
    pub fn remap(&self, entries: Vec<ArchiveEntry>) -> Result<RemapOutput, RemapError> {
        match self.thread_pool() {
            Some(pool) => pool.install(|| self.run(entries)),
            None => self.run(entries),
        }
    }

    fn thread_pool(&self) -> Option<rayon::ThreadPool> {
        let threads = self.config.threads?;
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("remap-{index}"))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(error) => {
                warn!(threads, %error, "failed to start worker pool, using the global pool");
                None
            }
        }
    }

    fn run(&self, entries: Vec<ArchiveEntry>) -> Result<RemapOutput, RemapError> {
        let mut report = RemapReport::default();
        let parsed: Vec<Parsed> = entries.par_iter().map(Parsed::new).collect();

        let mut builder = HierarchyBuilder::new();
        for class in &self.context {
            builder.add_context_class(class.clone());
        }
        for parsed in &parsed {
            if let Parsed::Class { entry, .. } = parsed {
                builder.add_class(entry.clone());
            }
        }
        let graph = builder.build(&self.mappings);
        for class in graph.cycles() {
            report.push(None, IssueKind::HierarchyCycle { class: class.clone() });
        }

        let resolver = SymbolResolver::new(&self.mappings, &graph);
        let plans = self.plan(&entries, &parsed, &resolver, &mut report)?;

        let rewriter = ClassRewriter::new(&resolver);
        let outcomes: Vec<Outcome> = entries
            .into_par_iter()
            .zip(parsed)
            .zip(plans)
            .map(|((entry, parsed), plan)| match (plan, parsed) {
                (Plan::Drop, _) => Outcome::Dropped,
                (Plan::Rewrite(path), Parsed::Class { class, .. }) => {
                    rewrite_class(&rewriter, entry, path, &class)
                }
                _ => self.copy_entry(entry, &resolver),
            })
            .collect();

        let mut output = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Outcome::Rewritten {
                    entry,
                    source,
                    issues,
                } => {
                    report.classes_rewritten += 1;
                    for issue in &issues {
                        report.push(Some(&source), issue.into());
                    }
                    output.push(entry);
                }
                Outcome::Copied(entry) => {
                    report.entries_copied += 1;
                    output.push(entry);
                }
                Outcome::Malformed { source, error } => {
                    warn!(entry = %source, %error, "skipping class that cannot be rewritten");
                    report.push(Some(&source), (&error).into());
                }
                Outcome::Dropped => {}
            }
        }

        info!(
            entries = output.len(),
            rewritten = report.classes_rewritten,
            copied = report.entries_copied,
            issues = report.issues.len(),
            "remapped archive"
        );
        Ok(RemapOutput {
            entries: output,
            report,
        })
    }

    /// Decides what happens to every entry and checks that output paths are
    /// unique.
    fn plan(
        &self,
        entries: &[ArchiveEntry],
        parsed: &[Parsed],
        resolver: &SymbolResolver<'_>,
        report: &mut RemapReport,
    ) -> Result<Vec<Plan>, RemapError> {
        let mut plans = Vec::with_capacity(entries.len());
        let mut outputs: HashMap<String, &str> = HashMap::with_capacity(entries.len());

        for (entry, parsed) in entries.iter().zip(parsed) {
            let plan = match parsed {
                Parsed::Malformed(error) => {
                    warn!(entry = %entry.path, %error, "skipping malformed class");
                    report.push(Some(&entry.path), error.into());
                    plans.push(Plan::Drop);
                    continue;
                }
                Parsed::Class { entry: class, .. } if self.config.is_excluded(&class.name) => {
                    debug!(class = %class.name, "copying class of excluded package");
                    Plan::Copy
                }
                Parsed::Class { entry: class, .. } => {
                    let new_name = resolver.class_name(&class.name);
                    Plan::Rewrite(output_path(&entry.path, &class.name, &new_name))
                }
                Parsed::Resource => Plan::Copy,
            };

            let path = match &plan {
                Plan::Rewrite(path) => path.as_str(),
                _ => entry.path.as_str(),
            };
            if let Some(first) = outputs.insert(path.to_owned(), &entry.path) {
                return Err(RemapError::new(
                    RemapErrorKind::DuplicateOutputPath {
                        path: path.to_owned(),
                        first: first.to_owned(),
                        second: entry.path.clone(),
                    },
                    std::mem::take(report),
                ));
            }
            plans.push(plan);
        }
        Ok(plans)
    }

    fn copy_entry(&self, entry: ArchiveEntry, resolver: &SymbolResolver<'_>) -> Outcome {
        if self.config.rewrite_manifest && entry.path.eq_ignore_ascii_case(MANIFEST_PATH) {
            if let Some(bytes) = rewrite_manifest(&entry.bytes, resolver) {
                return Outcome::Copied(ArchiveEntry::new(entry.path, bytes));
            }
        }
        Outcome::Copied(entry)
    }
}

/// An input entry after parsing.
enum Parsed {
    Class { class: ClassFile, entry: ClassEntry },
    Malformed(ClassFormatError),
    /// Anything copied as is, including `module-info`.
    Resource,
}

impl Parsed {
    fn new(entry: &ArchiveEntry) -> Self {
        if !entry.is_class() {
            return Self::Resource;
        }
        let parsed = ClassFile::parse(&entry.bytes).and_then(|class| {
            let hierarchy_entry = ClassEntry::from_class_file(&class)?;
            Ok((class, hierarchy_entry))
        });
        match parsed {
            Ok((class, _)) if class.is_module() => Self::Resource,
            Ok((class, entry)) => Self::Class { class, entry },
            Err(error) => Self::Malformed(error),
        }
    }
}

enum Plan {
    Rewrite(String),
    Copy,
    Drop,
}

enum Outcome {
    Rewritten {
        entry: ArchiveEntry,
        source: String,
        issues: Vec<DescriptorError>,
    },
    Copied(ArchiveEntry),
    Malformed {
        source: String,
        error: ClassFormatError,
    },
    Dropped,
}

fn rewrite_class(
    rewriter: &ClassRewriter<'_, '_>,
    entry: ArchiveEntry,
    path: String,
    class: &ClassFile,
) -> Outcome {
    let rewritten = rewriter
        .rewrite(class)
        .and_then(|rewritten| Ok((rewritten.class.to_bytes()?, rewritten.issues)));
    match rewritten {
        Ok((bytes, issues)) => Outcome::Rewritten {
            entry: ArchiveEntry::new(path, bytes),
            source: entry.path,
            issues,
        },
        Err(error) => Outcome::Malformed {
            source: entry.path,
            error,
        },
    }
}

/// The path a class is written to after renaming.
///
/// A prefix in front of the class path, such as `META-INF/versions/11/`,
/// is kept.
fn output_path(path: &str, old_name: &str, new_name: &str) -> String {
    if old_name == new_name {
        return path.to_owned();
    }
    let prefix = path
        .strip_suffix(".class")
        .and_then(|stem| stem.strip_suffix(old_name))
        .filter(|prefix| prefix.is_empty() || prefix.ends_with('/'));
    match prefix {
        Some(prefix) => format!("{prefix}{new_name}.class"),
        None => {
            debug!(path, class = old_name, "class is stored under an unexpected path");
            format!("{new_name}.class")
        }
    }
}
