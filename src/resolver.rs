//! Hierarchy-aware resolution of class, field and method names.

use std::borrow::Cow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{trace, warn};

use crate::descriptor::{self, DescriptorError};
use crate::hierarchy::HierarchyGraph;
use crate::mapping::{MappingTable, MemberKey, MemberKind};

/// The outcome of resolving a symbol.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResolvedMapping {
    /// The symbol gets this new name.
    Renamed(String),
    /// The symbol keeps its name.
    Unchanged,
}

impl ResolvedMapping {
    fn from_lookup(new_name: Option<&str>) -> Self {
        match new_name {
            Some(new_name) => Self::Renamed(new_name.to_owned()),
            None => Self::Unchanged,
        }
    }

    /// The new name, if the symbol is renamed.
    pub fn new_name(&self) -> Option<&str> {
        match self {
            Self::Renamed(new_name) => Some(new_name),
            Self::Unchanged => None,
        }
    }

    /// The new name, or `original` if the symbol is unchanged.
    pub fn name_or<'a>(&'a self, original: &'a str) -> &'a str {
        self.new_name().unwrap_or(original)
    }

    fn into_new_name(self) -> Option<String> {
        match self {
            Self::Renamed(new_name) => Some(new_name),
            Self::Unchanged => None,
        }
    }
}

/// A concurrent compute-once table.
///
/// Every key gets its own cell, so threads resolving different keys never
/// wait on each other's computation.
struct Memo<K, V = ResolvedMapping> {
    cells: Mutex<HashMap<K, Arc<OnceLock<V>>>>,
}

impl<K: Eq + Hash, V: Clone> Memo<K, V> {
    fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_compute(&self, key: K, compute: impl FnOnce() -> V) -> V {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cells.entry(key).or_default())
        };
        cell.get_or_init(compute).clone()
    }

    fn len(&self) -> usize {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The virtual dispatch families of one method name and descriptor.
///
/// Two declarations share a family when one overrides the other, or when a
/// common subclass inherits both of them. A class joins the family of every
/// declaration it inherits. All members of a family end up with one name.
struct Families<'a> {
    family_of: HashMap<&'a str, usize>,
    names: Vec<Option<&'a str>>,
}

impl<'a> Families<'a> {
    /// The name of the family of `class`, or `None` if the class neither
    /// declares nor inherits the method.
    fn name_of(&self, class: &str) -> Option<Option<&'a str>> {
        self.family_of.get(class).map(|family| self.names[*family])
    }
}

fn find_root(parents: &mut [usize], mut node: usize) -> usize {
    while parents[node] != node {
        parents[node] = parents[parents[node]];
        node = parents[node];
    }
    node
}

fn join(parents: &mut [usize], a: usize, b: usize) {
    let (a, b) = (find_root(parents, a), find_root(parents, b));
    if a != b {
        parents[a.max(b)] = a.min(b);
    }
}

/// Resolves the effective new names of symbols referenced by classes.
///
/// A resolver is created for one remapping run. Results are cached per key and
/// the resolver can be shared between threads.
///
/// # Examples
///
/// ```
/// use remapper::{ClassEntry, HierarchyBuilder, MappingRecord, MappingTable, SymbolResolver};
///
/// let mappings = MappingTable::from_records([
///     MappingRecord::class("a", "com/example/Base"),
///     MappingRecord::method("a", "b", "()V", "start"),
/// ])
/// .unwrap();
///
/// let mut builder = HierarchyBuilder::new();
/// builder
///     .add_class(
///         ClassEntry::new("a", Some("java/lang/Object"), &[]).with_method("b", "()V", 0x0001),
///     )
///     .add_class(ClassEntry::new("c", Some("a"), &[]));
/// let graph = builder.build(&mappings);
///
/// let resolver = SymbolResolver::new(&mappings, &graph);
/// let resolved = resolver.resolve_method("c", "b", "()V").unwrap();
/// assert_eq!(resolved.new_name(), Some("start"));
/// assert_eq!(resolver.remap_descriptor("(La;)V").unwrap(), "(Lcom/example/Base;)V");
/// ```
pub struct SymbolResolver<'a> {
    mappings: &'a MappingTable,
    graph: &'a HierarchyGraph,
    classes: Memo<String>,
    fields: Memo<MemberKey>,
    methods: Memo<MemberKey>,
    families: Memo<(String, String), Arc<Families<'a>>>,
}

impl<'a> SymbolResolver<'a> {
    /// Creates a resolver with empty caches.
    pub fn new(mappings: &'a MappingTable, graph: &'a HierarchyGraph) -> Self {
        Self {
            mappings,
            graph,
            classes: Memo::new(),
            fields: Memo::new(),
            methods: Memo::new(),
            families: Memo::new(),
        }
    }

    /// The mapping table used for lookups.
    pub fn mappings(&self) -> &'a MappingTable {
        self.mappings
    }

    /// The class hierarchy used for lookups.
    pub fn graph(&self) -> &'a HierarchyGraph {
        self.graph
    }

    /// Number of cached resolutions.
    pub fn cached_entries(&self) -> usize {
        self.classes.len() + self.fields.len() + self.methods.len()
    }

    /// Resolves a class by its internal name.
    ///
    /// Classes never inherit names from their ancestors; nested classes of
    /// renamed classes and classes of renamed packages follow their outer
    /// class or package.
    pub fn resolve_class(&self, name: &str) -> ResolvedMapping {
        self.classes.get_or_compute(name.to_owned(), || {
            trace!(class = name, "resolving class");
            match self.mappings.map_class(name) {
                Some(new_name) if new_name != name => ResolvedMapping::Renamed(new_name),
                _ => ResolvedMapping::Unchanged,
            }
        })
    }

    /// The new internal name of a class.
    pub fn class_name<'n>(&self, name: &'n str) -> Cow<'n, str> {
        match self.resolve_class(name) {
            ResolvedMapping::Renamed(new_name) => Cow::Owned(new_name),
            ResolvedMapping::Unchanged => Cow::Borrowed(name),
        }
    }

    fn map_class(&self, name: &str) -> Option<String> {
        self.resolve_class(name).into_new_name()
    }

    /// Remaps a constant pool class name, which may be an array descriptor.
    pub fn remap_type<'n>(&self, name: &'n str) -> Result<Cow<'n, str>, DescriptorError> {
        descriptor::remap_type(name, |class| self.map_class(class))
    }

    /// Remaps the class names in a field or method descriptor.
    pub fn remap_descriptor<'d>(
        &self,
        descriptor: &'d str,
    ) -> Result<Cow<'d, str>, DescriptorError> {
        descriptor::remap_descriptor(descriptor, |class| self.map_class(class))
    }

    /// Remaps the class names in a generic signature.
    pub fn remap_signature<'s>(&self, signature: &'s str) -> Result<Cow<'s, str>, DescriptorError> {
        descriptor::remap_signature(signature, |class| self.map_class(class))
    }

    /// Resolves a field referenced as `owner.name` with the given descriptor.
    ///
    /// A field declared by `owner` itself hides inherited fields of the same
    /// name, so only a direct entry can rename it. Otherwise the first
    /// ancestor with an entry supplies the name, and the first ancestor that
    /// declares the field without an entry stops the search.
    pub fn resolve_field(
        &self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<ResolvedMapping, DescriptorError> {
        descriptor::validate_field_descriptor(descriptor)?;
        let key = MemberKey::new(owner, name, descriptor);
        Ok(self.fields.get_or_compute(key, || {
            trace!(owner, name, descriptor, "resolving field");
            self.compute_field(owner, name, descriptor)
        }))
    }

    fn compute_field(&self, owner: &str, name: &str, descriptor: &str) -> ResolvedMapping {
        if let Some(new_name) = self.mappings.lookup_field(owner, name, descriptor) {
            return ResolvedMapping::Renamed(new_name.to_owned());
        }
        if self
            .graph
            .declared_member(owner, MemberKind::Field, name, descriptor)
            .is_some()
        {
            return ResolvedMapping::Unchanged;
        }

        for ancestor in self.graph.ancestors_of(owner) {
            let declared = self
                .graph
                .declared_member(ancestor, MemberKind::Field, name, descriptor);
            if declared.map_or(false, |field| field.is_private()) {
                continue;
            }
            if let Some(new_name) = self.mappings.lookup_field(ancestor, name, descriptor) {
                return ResolvedMapping::Renamed(new_name.to_owned());
            }
            if declared.is_some() {
                return ResolvedMapping::Unchanged;
            }
        }
        ResolvedMapping::Unchanged
    }

    /// Resolves a method referenced as `owner.name` with the given descriptor.
    ///
    /// Lookup order: the direct entry; for inherited methods the nearest
    /// ancestor entry; finally the entry of any declaration in the virtual
    /// dispatch family of the method. Constructors, static and private
    /// methods are only renamed by the entry of the class declaring them.
    pub fn resolve_method(
        &self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<ResolvedMapping, DescriptorError> {
        descriptor::validate_method_descriptor(descriptor)?;
        let key = MemberKey::new(owner, name, descriptor);
        Ok(self.methods.get_or_compute(key, || {
            trace!(owner, name, descriptor, "resolving method");
            self.compute_method(owner, name, descriptor)
        }))
    }

    fn compute_method(&self, owner: &str, name: &str, descriptor: &str) -> ResolvedMapping {
        let lookup = |class: &str| self.mappings.lookup_method(class, name, descriptor);

        if let Some(new_name) = lookup(owner) {
            return ResolvedMapping::Renamed(new_name.to_owned());
        }
        if name == "<init>" || name == "<clinit>" {
            return ResolvedMapping::Unchanged;
        }
        let declared = |class: &str| {
            self.graph
                .declared_member(class, MemberKind::Method, name, descriptor)
        };
        if declared(owner).map_or(false, |method| !method.is_virtual()) {
            return ResolvedMapping::Unchanged;
        }

        for ancestor in self.graph.ancestors_of(owner) {
            match declared(ancestor) {
                Some(method) if method.is_private() => continue,
                Some(method) if method.is_static() => {
                    // a static method reached through a subclass
                    return ResolvedMapping::from_lookup(lookup(ancestor));
                }
                _ => {}
            }
            if let Some(new_name) = lookup(ancestor) {
                return ResolvedMapping::Renamed(new_name.to_owned());
            }
        }

        self.resolve_from_family(owner, name, descriptor)
    }

    /// Looks for an entry anywhere in the virtual dispatch family of the
    /// method. An owner outside every family takes the name of the first
    /// subclass, breadth-first, whose family has one.
    fn resolve_from_family(&self, owner: &str, name: &str, descriptor: &str) -> ResolvedMapping {
        let families = self
            .families
            .get_or_compute((name.to_owned(), descriptor.to_owned()), || {
                Arc::new(self.build_families(name, descriptor))
            });
        if let Some(new_name) = families.name_of(owner) {
            return ResolvedMapping::from_lookup(new_name);
        }
        let found = self
            .graph
            .descendants_of(owner)
            .into_iter()
            .find_map(|class| families.name_of(class).flatten());
        ResolvedMapping::from_lookup(found)
    }

    fn build_families(&self, name: &str, descriptor: &str) -> Families<'a> {
        let graph = self.graph;
        let mappings = self.mappings;
        let declares_virtually = |class: &str| {
            graph
                .declared_member(class, MemberKind::Method, name, descriptor)
                .map_or(false, |method| method.is_virtual())
        };

        let mut classes: Vec<&'a str> = graph.classes().map(|entry| entry.name.as_str()).collect();
        classes.sort_unstable();
        let positions: HashMap<&'a str, usize> = classes
            .iter()
            .enumerate()
            .map(|(position, class)| (*class, position))
            .collect();

        let mut parents: Vec<usize> = (0..classes.len()).collect();
        let mut members = vec![false; classes.len()];
        for (position, class) in classes.iter().enumerate() {
            let declarations: Vec<usize> = std::iter::once(*class)
                .chain(graph.ancestors_of(class).iter().map(String::as_str))
                .filter(|declaring| declares_virtually(*declaring))
                .filter_map(|declaring| positions.get(declaring).copied())
                .collect();
            if declarations.is_empty() {
                continue;
            }
            members[position] = true;
            for declaration in declarations {
                join(&mut parents, position, declaration);
            }
        }

        let mut family_of = HashMap::new();
        let mut family_by_root: HashMap<usize, usize> = HashMap::new();
        let mut names: Vec<Option<&'a str>> = Vec::new();
        for (position, class) in classes.iter().enumerate() {
            if !members[position] {
                continue;
            }
            let root = find_root(&mut parents, position);
            let family = *family_by_root.entry(root).or_insert_with(|| {
                names.push(None);
                names.len() - 1
            });
            family_of.insert(*class, family);

            if !declares_virtually(*class) {
                continue;
            }
            let Some(new_name) = mappings.lookup_method(*class, name, descriptor) else {
                continue;
            };
            match names[family] {
                None => names[family] = Some(new_name),
                Some(chosen) if chosen != new_name => {
                    warn!(
                        class = *class,
                        name,
                        descriptor,
                        chosen,
                        ignored = new_name,
                        "conflicting mappings within override family"
                    );
                }
                Some(_) => {}
            }
        }

        trace!(name, descriptor, families = names.len(), "built override families");
        Families { family_of, names }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::access;
    use crate::hierarchy::{ClassEntry, HierarchyBuilder};
    use crate::mapping::MappingRecord;

    const PUBLIC: u16 = access::PUBLIC;

    fn setup(
        classes: Vec<ClassEntry>,
        records: Vec<MappingRecord>) -> (MappingTable, HierarchyGraph,
    ) {
        let mappings = MappingTable::from_records(records).unwrap();
        let mut builder = HierarchyBuilder::new();
        for class in classes {
            builder.add_class(class);
        }
        let graph = builder.build(&mappings);
        (mappings, graph)
    }

    #[test]
    fn test_inherited_method() {
        let (mappings, graph) = setup(
            vec![
                ClassEntry::new("A", None, &[]).with_method("m", "()V", PUBLIC),
                ClassEntry::new("B", Some("A"), &[]),
                ClassEntry::new("C", Some("B"), &[]),
            ],
            vec![MappingRecord::method("A", "m", "()V", "m2")],
        );
        let resolver = SymbolResolver::new(&mappings, &graph);
        for owner in ["A", "B", "C"] {
            assert_eq!(
                resolver.resolve_method(owner, "m", "()V").unwrap(),
                ResolvedMapping::Renamed("m2".into())
            );
        }
        assert_eq!(
            resolver.resolve_method("A", "m", "(I)V").unwrap(),
            ResolvedMapping::Unchanged
        );
    }

    #[test]
    fn test_override_family_propagation() {
        let (mappings, graph) = setup(
            vec![
                ClassEntry::new("A", None, &[]).with_method("m", "()V", PUBLIC),
                ClassEntry::new("B", Some("A"), &[]).with_method("m", "()V", PUBLIC),
                ClassEntry::new("C", Some("A"), &[]).with_method("m", "()V", PUBLIC),
            ],
            vec![MappingRecord::method("B", "m", "()V", "m3")],
        );
        let resolver = SymbolResolver::new(&mappings, &graph);
        for owner in ["A", "B", "C"] {
            assert_eq!(
                resolver.resolve_method(owner, "m", "()V").unwrap().new_name(),
                Some("m3"),
                "{owner}.m"
            );
        }
    }

    #[test]
    fn test_family_joins_through_common_subclass() {
        let (mappings, graph) = setup(
            vec![
                ClassEntry::new("Base", None, &[]).with_method("m", "()V", PUBLIC),
                ClassEntry::new("Iface", None, &[])
                    .with_method("m", "()V", PUBLIC | access::ABSTRACT),
                ClassEntry::new("Impl", Some("Base"), &["Iface"]),
                ClassEntry::new("Other", Some("Base"), &[]),
                ClassEntry::new("Unrelated", None, &[]).with_method("m", "()V", PUBLIC),
            ],
            vec![MappingRecord::method("Iface", "m", "()V", "run")],
        );
        let resolver = SymbolResolver::new(&mappings, &graph);
        for owner in ["Base", "Other", "Iface", "Impl"] {
            assert_eq!(
                resolver.resolve_method(owner, "m", "()V").unwrap().new_name(),
                Some("run"),
                "{owner}.m"
            );
        }
        assert_eq!(
            resolver.resolve_method("Unrelated", "m", "()V").unwrap(),
            ResolvedMapping::Unchanged
        );
        // the families of `m()V` are built once and shared by every owner
        assert_eq!(resolver.families.len(), 1);
    }

    #[test]
    fn test_static_and_private_are_not_inherited() {
        let (mappings, graph) = setup(
            vec![
                ClassEntry::new("A", None, &[])
                    .with_method("s", "()V", PUBLIC | access::STATIC)
                    .with_method("p", "()V", access::PRIVATE),
                ClassEntry::new("B", Some("A"), &[])
                    .with_method("p", "()V", access::PRIVATE)
                    .with_method("<init>", "()V", PUBLIC),
            ],
            vec![
                MappingRecord::method("A", "s", "()V", "staticRenamed"),
                MappingRecord::method("A", "p", "()V", "privateRenamed"),
                MappingRecord::method("A", "<init>", "()V", "<init>"),
            ],
        );
        let resolver = SymbolResolver::new(&mappings, &graph);
        // static method referenced through a subclass
        assert_eq!(
            resolver.resolve_method("B", "s", "()V").unwrap().new_name(),
            Some("staticRenamed")
        );
        // B.p is a different method than A.p
        assert_eq!(
            resolver.resolve_method("B", "p", "()V").unwrap(),
            ResolvedMapping::Unchanged
        );
        assert_eq!(
            resolver.resolve_method("B", "<init>", "()V").unwrap(),
            ResolvedMapping::Unchanged
        );
    }

    #[test]
    fn test_interface_method_through_implementation() {
        let (mappings, graph) = setup(
            vec![
                ClassEntry::new("I", None, &[])
                    .with_method("run", "()V", PUBLIC | access::ABSTRACT),
                ClassEntry::new("Impl", Some("java/lang/Object"), &["I"])
                    .with_method("run", "()V", PUBLIC),
            ],
            vec![MappingRecord::method("I", "run", "()V", "execute")],
        );
        let resolver = SymbolResolver::new(&mappings, &graph);
        assert_eq!(
            resolver.resolve_method("Impl", "run", "()V").unwrap().new_name(),
            Some("execute")
        );
    }

    #[test]
    fn test_field_hiding() {
        let (mappings, graph) = setup(
            vec![
                ClassEntry::new("A", None, &[]).with_field("f", "I", PUBLIC),
                ClassEntry::new("B", Some("A"), &[]).with_field("f", "I", PUBLIC),
                ClassEntry::new("C", Some("A"), &[]),
                ClassEntry::new("D", Some("B"), &[]),
            ],
            vec![MappingRecord::field("A", "f", "I", "value")],
        );
        let resolver = SymbolResolver::new(&mappings, &graph);
        assert_eq!(resolver.resolve_field("C", "f", "I").unwrap().new_name(), Some("value"));
        // B.f hides A.f
        assert_eq!(resolver.resolve_field("B", "f", "I").unwrap(), ResolvedMapping::Unchanged);
        assert_eq!(resolver.resolve_field("D", "f", "I").unwrap(), ResolvedMapping::Unchanged);
    }

    #[test]
    fn test_private_ancestor_field_is_skipped() {
        let (mappings, graph) = setup(
            vec![
                ClassEntry::new("A", None, &[]).with_field("f", "I", PUBLIC),
                ClassEntry::new("B", Some("A"), &[]).with_field("f", "I", access::PRIVATE),
                ClassEntry::new("C", Some("B"), &[]),
            ],
            vec![MappingRecord::field("A", "f", "I", "value")],
        );
        let resolver = SymbolResolver::new(&mappings, &graph);
        assert_eq!(resolver.resolve_field("C", "f", "I").unwrap().new_name(), Some("value"));
    }

    #[test]
    fn test_malformed_descriptor() {
        let (mappings, graph) = setup(Vec::new(), Vec::new());
        let resolver = SymbolResolver::new(&mappings, &graph);
        assert!(resolver.resolve_method("A", "m", "(Lx").is_err());
        assert!(resolver.resolve_field("A", "f", "()V").is_err());
        assert_eq!(resolver.cached_entries(), 0);
    }

    #[test]
    fn test_class_resolution() {
        let (mappings, graph) = setup(
            vec![ClassEntry::new("A", None, &[]), ClassEntry::new("B", Some("A"), &[])],
            vec![MappingRecord::class("A", "p/Alpha")],
        );
        let resolver = SymbolResolver::new(&mappings, &graph);
        assert_eq!(resolver.class_name("A"), "p/Alpha");
        // subclasses never inherit class names
        assert_eq!(resolver.class_name("B"), "B");
        assert_eq!(resolver.class_name("A$1"), "p/Alpha$1");
        assert_eq!(resolver.remap_type("[[LA;").unwrap(), "[[Lp/Alpha;");
    }

    #[test]
    fn test_cache_is_consistent() {
        let (mappings, graph) = setup(
            vec![
                ClassEntry::new("A", None, &[]).with_method("m", "()V", PUBLIC),
                ClassEntry::new("B", Some("A"), &[]),
            ],
            vec![MappingRecord::method("A", "m", "()V", "m2")],
        );
        let resolver = SymbolResolver::new(&mappings, &graph);
        let cold = resolver.resolve_method("B", "m", "()V").unwrap();
        let warm = resolver.resolve_method("B", "m", "()V").unwrap();
        assert_eq!(cold, warm);
        assert_eq!(resolver.cached_entries(), 1);
    }
}
