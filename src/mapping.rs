//! Mapping records and the exact-key mapping table.
//!
//! Records name classes and packages by their internal (`/`-separated) name
//! and members by owner, name and descriptor. Text formats are parsed
//! elsewhere; the table only consumes [`MappingRecord`]s.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::{
    is_valid_internal_name, remap_descriptor, validate_field_descriptor,
    validate_method_descriptor,
};

/// Error when loading a mapping record into a [`MappingTable`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind} in `{record}`")]
pub struct MappingError {
    record: String,
    kind: MappingErrorKind,
}

impl MappingError {
    fn new(record: &MappingRecord, kind: MappingErrorKind) -> Self {
        Self {
            record: record.to_string(),
            kind,
        }
    }

    /// The offending record, formatted.
    pub fn record(&self) -> &str {
        &self.record
    }

    /// The specific mapping error.
    pub fn kind(&self) -> &MappingErrorKind {
        &self.kind
    }
}

/// The specific mapping error.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MappingErrorKind {
    /// A name or descriptor in the record could not be parsed.
    #[error("malformed mapping: {0}")]
    Malformed(&'static str),
    /// The key is already mapped to a different name.
    #[error("conflicting mapping: already mapped to `{existing}`, not `{requested}`")]
    Conflict {
        /// The name the key was first mapped to.
        existing: String,
        /// The rejected name.
        requested: String,
    },
}

/// Whether a member is a field or a method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    /// A field.
    Field,
    /// A method.
    Method,
}

/// Identifies a member by its owner's old name, its name and its descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberKey {
    /// Internal name of the owning class.
    pub owner: String,
    /// Member name.
    pub name: String,
    /// Field or method descriptor.
    pub descriptor: String,
}

impl MemberKey {
    /// Creates a new key.
    pub fn new(owner: &str, name: &str, descriptor: &str) -> Self {
        Self {
            owner: owner.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        }
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descriptor.starts_with('(') {
            write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
        } else {
            write!(f, "{}.{}:{}", self.owner, self.name, self.descriptor)
        }
    }
}

/// A single old → new mapping.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MappingRecord {
    /// Moves every class under `old` (and its subpackages) to `new`.
    Package {
        /// Old package, `a/b`.
        old: String,
        /// New package; empty for the default package.
        new: String,
    },
    /// Renames a class.
    Class {
        /// Old internal name.
        old: String,
        /// New internal name.
        new: String,
    },
    /// Renames a field.
    Field {
        /// Old owner class.
        owner: String,
        /// Old field name.
        name: String,
        /// Field descriptor in old names. Without one, the record applies to
        /// every field of that name that has no exact entry.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        descriptor: Option<String>,
        /// New field name.
        new_name: String,
    },
    /// Renames a method.
    Method {
        /// Old owner class.
        owner: String,
        /// Old method name.
        name: String,
        /// Method descriptor in old names.
        descriptor: String,
        /// New method name.
        new_name: String,
    },
}

impl MappingRecord {
    /// A class record.
    pub fn class(old: &str, new: &str) -> Self {
        Self::Class {
            old: old.to_owned(),
            new: new.to_owned(),
        }
    }

    /// A package record.
    pub fn package(old: &str, new: &str) -> Self {
        Self::Package {
            old: old.to_owned(),
            new: new.to_owned(),
        }
    }

    /// A field record with an exact descriptor.
    pub fn field(owner: &str, name: &str, descriptor: &str, new_name: &str) -> Self {
        Self::Field {
            owner: owner.to_owned(),
            name: name.to_owned(),
            descriptor: Some(descriptor.to_owned()),
            new_name: new_name.to_owned(),
        }
    }

    /// A field record matching any descriptor.
    pub fn untyped_field(owner: &str, name: &str, new_name: &str) -> Self {
        Self::Field {
            owner: owner.to_owned(),
            name: name.to_owned(),
            descriptor: None,
            new_name: new_name.to_owned(),
        }
    }

    /// A method record.
    pub fn method(owner: &str, name: &str, descriptor: &str, new_name: &str) -> Self {
        Self::Method {
            owner: owner.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            new_name: new_name.to_owned(),
        }
    }

    fn validate(&self) -> Result<(), MappingErrorKind> {
        match self {
            MappingRecord::Package { old, new } => {
                if !is_valid_internal_name(old) {
                    return Err(MappingErrorKind::Malformed("invalid package name"));
                }
                if !new.is_empty() && !is_valid_internal_name(new) {
                    return Err(MappingErrorKind::Malformed("invalid package name"));
                }
            }
            MappingRecord::Class { old, new } => {
                if !is_valid_internal_name(old) || !is_valid_internal_name(new) {
                    return Err(MappingErrorKind::Malformed("invalid class name"));
                }
            }
            MappingRecord::Field {
                owner,
                name,
                descriptor,
                new_name,
            } => {
                validate_owner(owner)?;
                validate_member_name(name, new_name)?;
                if let Some(descriptor) = descriptor {
                    validate_field_descriptor(descriptor)
                        .map_err(|_| MappingErrorKind::Malformed("invalid field descriptor"))?;
                }
            }
            MappingRecord::Method {
                owner,
                name,
                descriptor,
                new_name,
            } => {
                validate_owner(owner)?;
                validate_member_name(name, new_name)?;
                validate_method_descriptor(descriptor)
                    .map_err(|_| MappingErrorKind::Malformed("invalid method descriptor"))?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for MappingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingRecord::Package { old, new } => write!(f, "package {old} -> {new}"),
            MappingRecord::Class { old, new } => write!(f, "class {old} -> {new}"),
            MappingRecord::Field {
                owner,
                name,
                descriptor,
                new_name,
            } => match descriptor {
                Some(descriptor) => write!(f, "field {owner}.{name}:{descriptor} -> {new_name}"),
                None => write!(f, "field {owner}.{name} -> {new_name}"),
            },
            MappingRecord::Method {
                owner,
                name,
                descriptor,
                new_name,
            } => write!(f, "method {owner}.{name}{descriptor} -> {new_name}"),
        }
    }
}

fn validate_owner(owner: &str) -> Result<(), MappingErrorKind> {
    if is_valid_internal_name(owner) {
        Ok(())
    } else {
        Err(MappingErrorKind::Malformed("invalid owner class name"))
    }
}

fn is_valid_member_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['.', ';', '[', '/', '<', '>'])
}

fn validate_member_name(name: &str, new_name: &str) -> Result<(), MappingErrorKind> {
    if name == "<init>" || name == "<clinit>" {
        // special methods can never be renamed
        return if new_name == name {
            Ok(())
        } else {
            Err(MappingErrorKind::Malformed("special methods cannot be renamed"))
        };
    }
    if is_valid_member_name(name) && is_valid_member_name(new_name) {
        Ok(())
    } else {
        Err(MappingErrorKind::Malformed("invalid member name"))
    }
}

#[derive(Clone, Debug, Default)]
struct FieldTargets {
    typed: HashMap<String, String>,
    untyped: Option<String>,
}

#[derive(Clone, Debug, Default)]
struct ClassMembers {
    fields: HashMap<String, FieldTargets>,
    methods: HashMap<String, HashMap<String, String>>,
}

/// Exact-key lookups from old to new names.
///
/// The table knows nothing about the class hierarchy; inherited members are
/// resolved by [`SymbolResolver`](crate::SymbolResolver).
///
/// # Examples
///
/// ```
/// use remapper::{MappingRecord, MappingTable};
///
/// let table = MappingTable::from_records([
///     MappingRecord::class("a", "com/example/Widget"),
///     MappingRecord::method("a", "b", "(La;)V", "attach"),
/// ])
/// .unwrap();
///
/// assert_eq!(table.lookup_class("a"), Some("com/example/Widget"));
/// assert_eq!(table.lookup_method("a", "b", "(La;)V"), Some("attach"));
/// assert_eq!(table.lookup_method("a", "b", "()V"), None);
/// ```
#[derive(Clone, Debug, Default)]
pub struct MappingTable {
    packages: HashMap<String, String>,
    classes: HashMap<String, String>,
    members: HashMap<String, ClassMembers>,
    field_count: usize,
    method_count: usize,
}

impl MappingTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from records, failing on the first invalid or
    /// conflicting one.
    pub fn from_records<I>(records: I) -> Result<Self, MappingError>
    where
        I: IntoIterator<Item = MappingRecord>,
    {
        let mut table = Self::new();
        for record in records {
            table.insert(record)?;
        }
        Ok(table)
    }

    /// Inserts a record. Re-inserting an identical record is a no-op.
    pub fn insert(&mut self, record: MappingRecord) -> Result<(), MappingError> {
        record
            .validate()
            .map_err(|kind| MappingError::new(&record, kind))?;

        let result = match &record {
            MappingRecord::Package { old, new } => insert_unique(&mut self.packages, old, new),
            MappingRecord::Class { old, new } => insert_unique(&mut self.classes, old, new),
            MappingRecord::Field {
                owner,
                name,
                descriptor,
                new_name,
            } => {
                let targets = self
                    .members
                    .entry(owner.clone())
                    .or_default()
                    .fields
                    .entry(name.clone())
                    .or_default();
                let inserted = match descriptor {
                    Some(descriptor) => insert_unique(&mut targets.typed, descriptor, new_name),
                    None => match &targets.untyped {
                        Some(existing) if existing != new_name => Err(MappingErrorKind::Conflict {
                            existing: existing.clone(),
                            requested: new_name.clone(),
                        }),
                        Some(_) => Ok(false),
                        None => {
                            targets.untyped = Some(new_name.clone());
                            Ok(true)
                        }
                    },
                };
                if let Ok(true) = inserted {
                    self.field_count += 1;
                }
                inserted
            }
            MappingRecord::Method {
                owner,
                name,
                descriptor,
                new_name,
            } => {
                let descriptors = self
                    .members
                    .entry(owner.clone())
                    .or_default()
                    .methods
                    .entry(name.clone())
                    .or_default();
                let inserted = insert_unique(descriptors, descriptor, new_name);
                if let Ok(true) = inserted {
                    self.method_count += 1;
                }
                inserted
            }
        };

        result
            .map(|_| ())
            .map_err(|kind| MappingError::new(&record, kind))
    }

    /// The new name of a class, exact match only.
    pub fn lookup_class(&self, name: &str) -> Option<&str> {
        self.classes.get(name).map(String::as_str)
    }

    /// The new name of a package, exact match only.
    pub fn lookup_package(&self, name: &str) -> Option<&str> {
        self.packages.get(name).map(String::as_str)
    }

    /// The new name of a field declared or referenced as `owner.name`.
    ///
    /// An entry for the exact descriptor takes precedence over one without a
    /// descriptor.
    pub fn lookup_field(&self, owner: &str, name: &str, descriptor: &str) -> Option<&str> {
        let targets = self.members.get(owner)?.fields.get(name)?;
        targets
            .typed
            .get(descriptor)
            .or(targets.untyped.as_ref())
            .map(String::as_str)
    }

    /// The new name of a method, exact match only.
    pub fn lookup_method(&self, owner: &str, name: &str, descriptor: &str) -> Option<&str> {
        self.members
            .get(owner)?
            .methods
            .get(name)?
            .get(descriptor)
            .map(String::as_str)
    }

    /// Maps a class name without consulting the hierarchy.
    ///
    /// Tries an exact class entry, then a renamed outer class for nested
    /// classes (`a$1` becomes `NewA$1`), then the longest mapped package.
    pub fn map_class(&self, name: &str) -> Option<String> {
        if let Some(new) = self.classes.get(name) {
            return Some(new.clone());
        }
        if let Some(split) = name.rfind('$') {
            if split > 0 {
                if let Some(outer) = self.map_class(&name[..split]) {
                    return Some(format!("{outer}{}", &name[split..]));
                }
            }
        }
        self.map_package(name)
    }

    fn map_package(&self, name: &str) -> Option<String> {
        if self.packages.is_empty() {
            return None;
        }
        let mut end = name.len();
        while let Some(split) = name[..end].rfind('/') {
            if let Some(new) = self.packages.get(&name[..split]) {
                let simple = &name[split + 1..];
                return Some(if new.is_empty() {
                    simple.to_owned()
                } else {
                    format!("{new}/{simple}")
                });
            }
            end = split;
        }
        None
    }

    /// Number of package records.
    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// Number of class records.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Number of field records.
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Number of method records.
    pub fn method_count(&self) -> usize {
        self.method_count
    }

    /// Whether the table holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
            && self.classes.is_empty()
            && self.field_count == 0
            && self.method_count == 0
    }

    /// All records, sorted.
    pub fn records(&self) -> Vec<MappingRecord> {
        let mut records = Vec::with_capacity(
            self.packages.len() + self.classes.len() + self.field_count + self.method_count,
        );
        records.extend(
            self.packages
                .iter()
                .map(|(old, new)| MappingRecord::package(old, new)),
        );
        records.extend(
            self.classes
                .iter()
                .map(|(old, new)| MappingRecord::class(old, new)),
        );
        for (owner, members) in &self.members {
            for (name, targets) in &members.fields {
                records.extend(targets.typed.iter().map(|(descriptor, new)| {
                    MappingRecord::field(owner, name, descriptor, new)
                }));
                if let Some(new) = &targets.untyped {
                    records.push(MappingRecord::untyped_field(owner, name, new));
                }
            }
            for (name, descriptors) in &members.methods {
                records.extend(descriptors.iter().map(|(descriptor, new)| {
                    MappingRecord::method(owner, name, descriptor, new)
                }));
            }
        }
        records.sort();
        records
    }

    /// Builds the inverse table, mapping new names back to old ones.
    ///
    /// Member owners and descriptors are translated into the new naming so
    /// that the result can be applied to remapped classes directly.
    pub fn reversed(&self) -> Result<Self, MappingError> {
        let map = |name: &str| self.map_class(name);
        let translate = |descriptor: &str| -> Result<String, MappingError> {
            // descriptors were validated on insert
            remap_descriptor(descriptor, map)
                .map(Cow::into_owned)
                .map_err(|_| MappingError {
                    record: descriptor.to_owned(),
                    kind: MappingErrorKind::Malformed("invalid descriptor"),
                })
        };

        let mut reversed = Self::new();
        for record in self.records() {
            let inverse = match record {
                MappingRecord::Package { old, new } => {
                    MappingRecord::Package { old: new, new: old }
                }
                MappingRecord::Class { old, new } => MappingRecord::Class { old: new, new: old },
                MappingRecord::Field {
                    owner,
                    name,
                    descriptor,
                    new_name,
                } => MappingRecord::Field {
                    owner: self.map_class(&owner).unwrap_or(owner),
                    name: new_name,
                    descriptor: descriptor.as_deref().map(&translate).transpose()?,
                    new_name: name,
                },
                MappingRecord::Method {
                    owner,
                    name,
                    descriptor,
                    new_name,
                } => MappingRecord::Method {
                    owner: self.map_class(&owner).unwrap_or(owner),
                    name: new_name,
                    descriptor: translate(&descriptor)?,
                    new_name: name,
                },
            };
            reversed.insert(inverse)?;
        }
        Ok(reversed)
    }
}

/// Inserts `key -> value`, returning whether a new entry was created.
fn insert_unique(
    map: &mut HashMap<String, String>,
    key: &str,
    value: &str,
) -> Result<bool, MappingErrorKind> {
    match map.get(key) {
        Some(existing) if existing == value => Ok(false),
        Some(existing) => Err(MappingErrorKind::Conflict {
            existing: existing.clone(),
            requested: value.to_owned(),
        }),
        None => {
            map.insert(key.to_owned(), value.to_owned());
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_records_are_idempotent() {
        let mut table = MappingTable::new();
        table.insert(MappingRecord::class("a", "p/A")).unwrap();
        table.insert(MappingRecord::class("a", "p/A")).unwrap();
        table
            .insert(MappingRecord::method("a", "b", "()V", "run"))
            .unwrap();
        table
            .insert(MappingRecord::method("a", "b", "()V", "run"))
            .unwrap();
        assert_eq!(table.class_count(), 1);
        assert_eq!(table.method_count(), 1);
    }

    #[test]
    fn test_conflict() {
        let mut table = MappingTable::new();
        table.insert(MappingRecord::class("a", "p/A")).unwrap();
        let err = table.insert(MappingRecord::class("a", "p/B")).unwrap_err();
        assert_eq!(
            err.kind(),
            &MappingErrorKind::Conflict {
                existing: "p/A".into(),
                requested: "p/B".into(),
            }
        );
        assert_eq!(err.record(), "class a -> p/B");
        // the first mapping stays in place
        assert_eq!(table.lookup_class("a"), Some("p/A"));
    }

    #[test]
    fn test_malformed_records() {
        let malformed = [
            MappingRecord::class("a.b", "p/A"),
            MappingRecord::class("a", ""),
            MappingRecord::method("a", "b", "(I", "c"),
            MappingRecord::method("a", "b", "()V", "c.d"),
            MappingRecord::method("a", "<init>", "()V", "create"),
            MappingRecord::field("a", "", "I", "x"),
            MappingRecord::field("a", "b", "V", "x"),
            MappingRecord::field("La;", "b", "I", "x"),
            MappingRecord::package("a/", "b"),
        ];
        for record in malformed {
            let err = MappingTable::from_records([record.clone()]).unwrap_err();
            assert!(
                matches!(err.kind(), MappingErrorKind::Malformed(_)),
                "{record} should be malformed"
            );
        }
        let records = [MappingRecord::method("a", "<init>", "()V", "<init>")];
        assert!(MappingTable::from_records(records).is_ok());
    }

    #[test]
    fn test_field_descriptor_fallback() {
        let table = MappingTable::from_records([
            MappingRecord::untyped_field("a", "b", "any"),
            MappingRecord::field("a", "b", "I", "exact"),
        ])
        .unwrap();
        assert_eq!(table.lookup_field("a", "b", "I"), Some("exact"));
        assert_eq!(table.lookup_field("a", "b", "J"), Some("any"));
        assert_eq!(table.lookup_field("a", "c", "I"), None);
        assert_eq!(table.field_count(), 2);
    }

    #[test]
    fn test_map_class_nested_and_packages() {
        let table = MappingTable::from_records([
            MappingRecord::class("a", "p/Outer"),
            MappingRecord::class("a$b", "p/Outer$Named"),
            MappingRecord::package("x", "net/y"),
            MappingRecord::package("x/z", "org/z"),
        ])
        .unwrap();
        assert_eq!(table.map_class("a$1").as_deref(), Some("p/Outer$1"));
        assert_eq!(table.map_class("a$b$c").as_deref(), Some("p/Outer$Named$c"));
        assert_eq!(table.map_class("x/K").as_deref(), Some("net/y/K"));
        assert_eq!(table.map_class("x/z/K").as_deref(), Some("org/z/K"));
        assert_eq!(table.map_class("x/w/K").as_deref(), Some("net/y/w/K"));
        assert_eq!(table.map_class("xx/K"), None);
        assert_eq!(table.map_class("$Proxy"), None);
    }

    #[test]
    fn test_reversed() {
        let table = MappingTable::from_records([
            MappingRecord::class("a", "p/A"),
            MappingRecord::class("b", "p/B"),
            MappingRecord::field("a", "c", "Lb;", "child"),
            MappingRecord::method("a", "d", "(Lb;)La;", "with"),
        ])
        .unwrap();
        let reversed = table.reversed().unwrap();
        assert_eq!(reversed.lookup_class("p/A"), Some("a"));
        assert_eq!(reversed.lookup_field("p/A", "child", "Lp/B;"), Some("c"));
        assert_eq!(reversed.lookup_method("p/A", "with", "(Lp/B;)Lp/A;"), Some("d"));

        let restored = reversed.reversed().unwrap();
        assert_eq!(restored.records(), table.records());
    }

    #[test]
    fn test_reversed_conflict() {
        let table = MappingTable::from_records([
            MappingRecord::class("a", "p/Same"),
            MappingRecord::class("b", "p/Same"),
        ])
        .unwrap();
        assert!(matches!(
            table.reversed().unwrap_err().kind(),
            MappingErrorKind::Conflict { .. }
        ));
    }

    #[test]
    fn test_records_serde() {
        let record = MappingRecord::untyped_field("a", "b", "c");
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"kind":"field","owner":"a","name":"b","new_name":"c"}"#);
        let parsed: MappingRecord = serde_json::from_str(
            r#"{"kind":"method","owner":"a","name":"b","descriptor":"()V","new_name":"run"}"#,
        )
        .unwrap();
        assert_eq!(parsed, MappingRecord::method("a", "b", "()V", "run"));
    }
}
