//! This crate renames the symbols of compiled JVM class files.
//!
//! Given a table of old and new names for packages, classes, fields and
//! methods, it rewrites every reference inside the class files of an archive:
//! declarations, invocations, field accesses, descriptors, generic
//! signatures, inner class attributes and annotations. References made
//! through subclasses and overriding methods are resolved across the class
//! hierarchy. Bytecode is never modified, so rewritten classes keep their
//! code offsets and still verify.
//!
//! # Examples
//!
//! ```
//! use remapper::classfile::{access, ClassFile};
//! use remapper::{ArchiveEntry, MappingRecord, Remapper};
//!
//! let mut class = ClassFile::new("a", Some("java/lang/Object"), access::PUBLIC).unwrap();
//! class.add_member(true, access::PUBLIC, "b", "(La;)V", Vec::new()).unwrap();
//!
//! let remapper = Remapper::from_records([
//!     MappingRecord::class("a", "com/example/Widget"),
//!     MappingRecord::method("a", "b", "(La;)V", "attach"),
//! ])
//! .unwrap();
//!
//! let output = remapper
//!     .remap(vec![ArchiveEntry::new("a.class", class.to_bytes().unwrap())])
//!     .unwrap();
//! assert_eq!(output.entries[0].path, "com/example/Widget.class");
//!
//! let rewritten = ClassFile::parse(&output.entries[0].bytes).unwrap();
//! let method = &rewritten.methods[0];
//! assert_eq!(method.name(&rewritten.pool).unwrap(), "attach");
//! assert_eq!(
//!     method.descriptor(&rewritten.pool).unwrap(),
//!     "(Lcom/example/Widget;)V"
//! );
//! ```
//!
//! Mapping tables can also be derived by comparing two builds of the same
//! program with [`compare_builds`].

#![warn(missing_docs)]

pub mod classfile;
mod compare;
mod config;
pub mod descriptor;
mod hierarchy;
mod manifest;
mod mapping;
mod pipeline;
mod report;
mod resolver;
mod rewriter;

pub use compare::{compare_builds, CompareError};
pub use config::RemapConfig;
pub use hierarchy::{ClassEntry, HierarchyBuilder, HierarchyGraph, MemberInfo};
pub use mapping::{
    MappingError, MappingErrorKind, MappingRecord, MappingTable, MemberKey, MemberKind,
};
pub use pipeline::{ArchiveEntry, RemapError, RemapErrorKind, RemapOutput, Remapper};
pub use report::{Issue, IssueKind, RemapReport};
pub use resolver::{ResolvedMapping, SymbolResolver};
pub use rewriter::{ClassRewriter, RewrittenClass};
