//! The class hierarchy of the processed classes.
//!
//! The graph is built once from the input classes and an optional set of
//! read-only context classes (libraries the input extends), then shared
//! immutably. Ancestor lists are computed lazily and memoized per class.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classfile::{access, ClassFile, ClassFormatError};
use crate::mapping::{MappingTable, MemberKind};

/// A member declared by a class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// Field or method.
    pub kind: MemberKind,
    /// Declared name.
    pub name: String,
    /// Declared descriptor.
    pub descriptor: String,
    /// Access flags.
    pub access: u16,
}

impl MemberInfo {
    /// Creates a new member description.
    pub fn new(kind: MemberKind, name: &str, descriptor: &str, access: u16) -> Self {
        Self {
            kind,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            access,
        }
    }

    /// Whether the member is `static`.
    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    /// Whether the member is `private`.
    pub fn is_private(&self) -> bool {
        self.access & access::PRIVATE != 0
    }

    /// Whether calls to this method dispatch virtually.
    pub fn is_virtual(&self) -> bool {
        !self.is_static() && !self.is_private() && !self.name.starts_with('<')
    }
}

/// A class as seen by the hierarchy: its name, parents and declarations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassEntry {
    /// Old internal name.
    pub name: String,
    /// New internal name, `None` when the class keeps its name. Filled in by
    /// [`HierarchyBuilder::build`].
    #[serde(default)]
    pub new_name: Option<String>,
    /// Class access flags.
    pub access: u16,
    /// Superclass, `None` for `java/lang/Object`.
    pub super_name: Option<String>,
    /// Direct superinterfaces, in declaration order.
    pub interfaces: Vec<String>,
    /// Declared fields and methods.
    #[serde(default)]
    pub members: Vec<MemberInfo>,
    /// Whether this is a read-only context class.
    #[serde(default)]
    pub context: bool,
}

impl ClassEntry {
    /// Creates an entry without members.
    pub fn new(name: &str, super_name: Option<&str>, interfaces: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            new_name: None,
            access: access::PUBLIC | access::SUPER,
            super_name: super_name.map(str::to_owned),
            interfaces: interfaces.iter().map(|i| (*i).to_owned()).collect(),
            members: Vec::new(),
            context: false,
        }
    }

    /// Adds a declared field.
    pub fn with_field(mut self, name: &str, descriptor: &str, access: u16) -> Self {
        self.members
            .push(MemberInfo::new(MemberKind::Field, name, descriptor, access));
        self
    }

    /// Adds a declared method.
    pub fn with_method(mut self, name: &str, descriptor: &str, access: u16) -> Self {
        self.members
            .push(MemberInfo::new(MemberKind::Method, name, descriptor, access));
        self
    }

    /// Extracts the hierarchy information of a parsed class.
    pub fn from_class_file(class: &ClassFile) -> Result<Self, ClassFormatError> {
        let mut members = Vec::with_capacity(class.fields.len() + class.methods.len());
        for (kind, declared) in [
            (MemberKind::Field, &class.fields),
            (MemberKind::Method, &class.methods),
        ] {
            for member in declared {
                members.push(MemberInfo::new(
                    kind,
                    member.name(&class.pool)?,
                    member.descriptor(&class.pool)?,
                    member.access_flags,
                ));
            }
        }

        Ok(Self {
            name: class.name()?.to_owned(),
            new_name: None,
            access: class.access_flags,
            super_name: class.super_name()?.map(str::to_owned),
            interfaces: class
                .interface_names()?
                .into_iter()
                .map(str::to_owned)
                .collect(),
            members,
            context: false,
        })
    }

    /// Parses class bytes and extracts the hierarchy information.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ClassFormatError> {
        Self::from_class_file(&ClassFile::parse(data)?)
    }

    fn parents(&self) -> impl Iterator<Item = &str> {
        self.super_name
            .as_deref()
            .into_iter()
            .chain(self.interfaces.iter().map(String::as_str))
    }
}

/// Collects classes for a [`HierarchyGraph`].
#[derive(Debug, Default)]
pub struct HierarchyBuilder {
    classes: Vec<ClassEntry>,
    context: Vec<ClassEntry>,
}

impl HierarchyBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an input class.
    pub fn add_class(&mut self, entry: ClassEntry) -> &mut Self {
        self.classes.push(entry);
        self
    }

    /// Adds a read-only context class. Input classes of the same name take
    /// precedence.
    pub fn add_context_class(&mut self, mut entry: ClassEntry) -> &mut Self {
        entry.context = true;
        self.context.push(entry);
        self
    }

    /// Builds the graph, assigning new names to input classes from `mappings`.
    pub fn build(self, mappings: &MappingTable) -> HierarchyGraph {
        let mut nodes: HashMap<String, ClassNode> = HashMap::new();

        for mut entry in self.context {
            entry.new_name = None;
            nodes.insert(entry.name.clone(), ClassNode::new(entry));
        }

        let mut seen_inputs = HashSet::new();
        for mut entry in self.classes {
            if !seen_inputs.insert(entry.name.clone()) {
                warn!(class = %entry.name, "duplicate input class ignored for hierarchy");
                continue;
            }
            entry.context = false;
            entry.new_name = mappings.map_class(&entry.name);
            nodes.insert(entry.name.clone(), ClassNode::new(entry));
        }

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for node in nodes.values() {
            for parent in node.entry.parents() {
                if nodes.contains_key(parent) {
                    children
                        .entry(parent.to_owned())
                        .or_default()
                        .push(node.entry.name.clone());
                }
            }
        }
        for (parent, mut list) in children {
            list.sort();
            list.dedup();
            if let Some(node) = nodes.get_mut(&parent) {
                node.children = list;
            }
        }

        let mut graph = HierarchyGraph {
            nodes,
            cycles: Vec::new(),
        };
        graph.cycles = graph.find_cycles();
        for class in &graph.cycles {
            warn!(class = %class, "class hierarchy contains a cycle");
        }
        debug!(classes = graph.nodes.len(), "built class hierarchy");
        graph
    }
}

#[derive(Debug)]
struct ClassNode {
    entry: ClassEntry,
    /// Indices into `entry.members` by member name.
    declared: HashMap<String, Vec<usize>>,
    children: Vec<String>,
    ancestors: OnceLock<Vec<String>>,
}

impl ClassNode {
    fn new(entry: ClassEntry) -> Self {
        let mut declared: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, member) in entry.members.iter().enumerate() {
            declared.entry(member.name.clone()).or_default().push(index);
        }
        Self {
            entry,
            declared,
            children: Vec::new(),
            ancestors: OnceLock::new(),
        }
    }
}

/// Superclass and interface edges of all known classes.
///
/// # Examples
///
/// ```
/// use remapper::{ClassEntry, HierarchyBuilder, MappingTable};
///
/// let mut builder = HierarchyBuilder::new();
/// builder
///     .add_class(ClassEntry::new("a", Some("java/lang/Object"), &["i"]))
///     .add_class(ClassEntry::new("b", Some("a"), &[]));
/// let graph = builder.build(&MappingTable::new());
///
/// assert_eq!(graph.ancestors_of("b"), ["a", "java/lang/Object", "i"]);
/// assert_eq!(graph.descendants_of("a"), vec!["b"]);
/// ```
#[derive(Debug)]
pub struct HierarchyGraph {
    nodes: HashMap<String, ClassNode>,
    cycles: Vec<String>,
}

impl HierarchyGraph {
    /// The entry of a known class.
    pub fn get(&self, name: &str) -> Option<&ClassEntry> {
        self.nodes.get(name).map(|node| &node.entry)
    }

    /// Whether the class is known.
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Number of known classes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over all known classes in arbitrary order.
    pub fn classes(&self) -> impl Iterator<Item = &ClassEntry> {
        self.nodes.values().map(|node| &node.entry)
    }

    /// Classes whose ancestry loops back onto themselves, sorted by name.
    pub fn cycles(&self) -> &[String] {
        &self.cycles
    }

    /// All ancestors of `name`: the superclass chain first, then the
    /// interfaces of the class and of each superclass, depth-first in
    /// declaration order. Every class is listed once.
    ///
    /// Ancestors that are not part of the graph are listed but not expanded.
    pub fn ancestors_of(&self, name: &str) -> &[String] {
        match self.nodes.get(name) {
            Some(node) => node.ancestors.get_or_init(|| self.compute_ancestors(name)),
            None => &[],
        }
    }

    fn compute_ancestors(&self, name: &str) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(name);
        let mut ancestors = Vec::new();

        let mut chain = vec![name];
        let mut current = self.get(name).and_then(|entry| entry.super_name.as_deref());
        while let Some(super_name) = current {
            if !visited.insert(super_name) {
                break;
            }
            ancestors.push(super_name.to_owned());
            chain.push(super_name);
            current = self.get(super_name).and_then(|entry| entry.super_name.as_deref());
        }

        for class in chain {
            if let Some(entry) = self.get(class) {
                for interface in &entry.interfaces {
                    self.visit_interface(interface, &mut visited, &mut ancestors);
                }
            }
        }
        ancestors
    }

    fn visit_interface<'g>(
        &'g self,
        name: &'g str,
        visited: &mut HashSet<&'g str>,
        ancestors: &mut Vec<String>,
    ) {
        if !visited.insert(name) {
            return;
        }
        ancestors.push(name.to_owned());
        if let Some(entry) = self.get(name) {
            for interface in &entry.interfaces {
                self.visit_interface(interface, visited, ancestors);
            }
        }
    }

    /// All classes that have `name` among their ancestors, breadth-first
    /// with siblings sorted by name.
    pub fn descendants_of(&self, name: &str) -> Vec<&str> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut descendants = Vec::new();

        if let Some((root, _)) = self.nodes.get_key_value(name) {
            visited.insert(root.as_str());
            queue.push_back(root.as_str());
        }
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            for child in &node.children {
                if visited.insert(child.as_str()) {
                    descendants.push(child.as_str());
                    queue.push_back(child.as_str());
                }
            }
        }
        descendants
    }

    /// The member `class` declares with the given kind, name and descriptor.
    pub fn declared_member(
        &self,
        class: &str,
        kind: MemberKind,
        name: &str,
        descriptor: &str,
    ) -> Option<&MemberInfo> {
        let node = self.nodes.get(class)?;
        node.declared
            .get(name)?
            .iter()
            .map(|index| &node.entry.members[*index])
            .find(|member| member.kind == kind && member.descriptor == descriptor)
    }

    fn find_cycles(&self) -> Vec<String> {
        let mut cyclic: Vec<String> = self
            .nodes
            .keys()
            .filter(|name| self.reaches_itself(name))
            .cloned()
            .collect();
        cyclic.sort();
        cyclic
    }

    fn reaches_itself(&self, start: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = match self.get(start) {
            Some(entry) => entry.parents().collect(),
            None => return false,
        };
        while let Some(current) = stack.pop() {
            if current == start {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(entry) = self.get(current) {
                stack.extend(entry.parents());
            }
        }
        false
    }
}
