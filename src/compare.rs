//! Derives mappings from two builds of the same program.
//!
//! The builds must contain the same classes in the same order, each with the
//! same members in the same order, as produced by two obfuscation runs over
//! identical input. Classes and members are paired by position.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::classfile::{ClassFile, ClassFormatError, Member};
use crate::descriptor;
use crate::mapping::{MappingError, MappingRecord, MappingTable, MemberKind};
use crate::pipeline::ArchiveEntry;

/// Error when two builds cannot be paired.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CompareError {
    /// A class entry could not be parsed.
    #[error("malformed class `{path}`")]
    MalformedClass {
        /// Path of the entry.
        path: String,
        /// The parse failure.
        #[source]
        error: ClassFormatError,
    },
    /// The builds contain different numbers of classes.
    #[error("left build has {left} classes, right build has {right}")]
    ClassCount {
        /// Classes in the left build.
        left: usize,
        /// Classes in the right build.
        right: usize,
    },
    /// Paired classes declare different numbers of fields or methods.
    #[error("`{left_class}` and `{right_class}` declare different {kind:?} counts")]
    MemberCount {
        /// The left class.
        left_class: String,
        /// The right class.
        right_class: String,
        /// Whether fields or methods differ.
        kind: MemberKind,
    },
    /// Paired members have descriptors that do not correspond.
    #[error("`{left}` does not correspond to `{right}`")]
    MemberMismatch {
        /// The left member, as `owner.name descriptor`.
        left: String,
        /// The right member, as `owner.name descriptor`.
        right: String,
    },
    /// The derived records contradict each other.
    #[error("conflicting mapping")]
    Mapping(#[from] MappingError),
}

/// A parsed class of one build.
struct BuildClass<'e> {
    path: &'e str,
    class: ClassFile,
}

impl BuildClass<'_> {
    fn malformed(&self, error: ClassFormatError) -> CompareError {
        CompareError::MalformedClass {
            path: self.path.to_owned(),
            error,
        }
    }

    fn name(&self) -> Result<&str, CompareError> {
        self.class.name().map_err(|error| self.malformed(error))
    }

    fn member(&self, member: &Member) -> Result<(&str, &str), CompareError> {
        let pool = &self.class.pool;
        let name = member.name(pool).map_err(|error| self.malformed(error))?;
        let descriptor = member
            .descriptor(pool)
            .map_err(|error| self.malformed(error))?;
        Ok((name, descriptor))
    }
}

/// Builds the mapping table that renames the left build into the right one.
///
/// Only symbols whose names differ get an entry. Constructors and static
/// initializers are paired but never mapped.
pub fn compare_builds(
    left: &[ArchiveEntry],
    right: &[ArchiveEntry],
) -> Result<MappingTable, CompareError> {
    let left = parse_classes(left)?;
    let right = parse_classes(right)?;
    if left.len() != right.len() {
        return Err(CompareError::ClassCount {
            left: left.len(),
            right: right.len(),
        });
    }

    let mut table = MappingTable::new();
    let mut classes = HashMap::with_capacity(left.len());
    for (left, right) in left.iter().zip(&right) {
        let (old, new) = (left.name()?, right.name()?);
        classes.insert(old, new);
        if old != new {
            table.insert(MappingRecord::class(old, new))?;
        }
    }

    for (left, right) in left.iter().zip(&right) {
        let pairs = [
            (MemberKind::Field, &left.class.fields, &right.class.fields),
            (MemberKind::Method, &left.class.methods, &right.class.methods),
        ];
        for (kind, left_members, right_members) in pairs {
            if left_members.len() != right_members.len() {
                return Err(CompareError::MemberCount {
                    left_class: left.name()?.to_owned(),
                    right_class: right.name()?.to_owned(),
                    kind,
                });
            }
            for (left_member, right_member) in left_members.iter().zip(right_members) {
                let record = pair_members(
                    kind,
                    (left, left_member),
                    (right, right_member),
                    &classes,
                )?;
                if let Some(record) = record {
                    table.insert(record)?;
                }
            }
        }
    }

    info!(
        classes = table.class_count(),
        fields = table.field_count(),
        methods = table.method_count(),
        "derived mappings from builds"
    );
    Ok(table)
}

fn parse_classes(entries: &[ArchiveEntry]) -> Result<Vec<BuildClass<'_>>, CompareError> {
    let mut classes = Vec::new();
    for entry in entries.iter().filter(|entry| entry.is_class()) {
        let class = ClassFile::parse(&entry.bytes).map_err(|error| CompareError::MalformedClass {
            path: entry.path.clone(),
            error,
        })?;
        if class.is_module() {
            debug!(path = %entry.path, "skipping module descriptor");
            continue;
        }
        classes.push(BuildClass {
            path: &entry.path,
            class,
        });
    }
    Ok(classes)
}

fn is_initializer(name: &str) -> bool {
    name == "<init>" || name == "<clinit>"
}

fn pair_members(
    kind: MemberKind,
    (left_class, left): (&BuildClass<'_>, &Member),
    (right_class, right): (&BuildClass<'_>, &Member),
    classes: &HashMap<&str, &str>,
) -> Result<Option<MappingRecord>, CompareError> {
    let owner = left_class.name()?;
    let (old_name, old_descriptor) = left_class.member(left)?;
    let (new_name, new_descriptor) = right_class.member(right)?;

    let translated = descriptor::remap_descriptor(old_descriptor, |class| {
        classes.get(class).map(|new| new.to_string())
    });
    let corresponds = matches!(translated, Ok(translated) if translated == new_descriptor);
    if !corresponds || is_initializer(old_name) != is_initializer(new_name) {
        return Err(CompareError::MemberMismatch {
            left: format!("{owner}.{old_name} {old_descriptor}"),
            right: format!("{}.{new_name} {new_descriptor}", right_class.name()?),
        });
    }

    if old_name == new_name || is_initializer(old_name) {
        return Ok(None);
    }
    Ok(Some(match kind {
        MemberKind::Field => MappingRecord::field(owner, old_name, old_descriptor, new_name),
        MemberKind::Method => MappingRecord::method(owner, old_name, old_descriptor, new_name),
    }))
}
