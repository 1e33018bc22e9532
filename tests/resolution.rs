use lazy_static::lazy_static;
use rayon::prelude::*;

use remapper::classfile::access::{ABSTRACT, INTERFACE, PRIVATE, PUBLIC, STATIC};
use remapper::{
    ClassEntry, HierarchyBuilder, HierarchyGraph, MappingRecord, MappingTable, ResolvedMapping,
    SymbolResolver,
};

const OBJECT: &str = "java/lang/Object";

lazy_static! {
    static ref MAPPINGS: MappingTable = MappingTable::from_records([
        MappingRecord::package("lib", "com/example/lib"),
        MappingRecord::class("shape", "com/example/Shape"),
        MappingRecord::method("shape", "area", "()D", "computeArea"),
        MappingRecord::method("square", "scale", "(D)Lshape;", "resize"),
        MappingRecord::method("shape", "create", "()Lshape;", "newInstance"),
        MappingRecord::field("shape", "id", "I", "identifier"),
        MappingRecord::untyped_field("circle", "r", "radius"),
        MappingRecord::method("visitor", "visit", "(Lshape;)V", "accept"),
    ])
    .unwrap();

    /// shape <- square <- cube, shape <- circle, visitor <- printer and
    /// logger, where printer also extends square.
    static ref GRAPH: HierarchyGraph = {
        let mut builder = HierarchyBuilder::new();
        builder
            .add_class(
                ClassEntry::new("shape", Some(OBJECT), &[])
                    .with_method("area", "()D", PUBLIC)
                    .with_method("create", "()Lshape;", PUBLIC | STATIC)
                    .with_method("hidden", "()V", PRIVATE)
                    .with_field("id", "I", PUBLIC),
            )
            .add_class(
                ClassEntry::new("square", Some("shape"), &[])
                    .with_method("area", "()D", PUBLIC)
                    .with_method("scale", "(D)Lshape;", PUBLIC),
            )
            .add_class(
                ClassEntry::new("cube", Some("square"), &[])
                    .with_method("scale", "(D)Lshape;", PUBLIC)
                    .with_field("id", "I", PUBLIC),
            )
            .add_class(
                ClassEntry::new("circle", Some("shape"), &[])
                    .with_field("r", "D", PRIVATE)
                    .with_method("hidden", "()V", PUBLIC),
            )
            .add_class(interface("visitor").with_method("visit", "(Lshape;)V", PUBLIC))
            .add_class(
                ClassEntry::new("printer", Some("square"), &["visitor"])
                    .with_method("visit", "(Lshape;)V", PUBLIC),
            )
            .add_class(
                ClassEntry::new("logger", Some(OBJECT), &["visitor"])
                    .with_method("visit", "(Lshape;)V", PUBLIC),
            );
        builder.build(&MAPPINGS)
    };
}

fn interface(name: &str) -> ClassEntry {
    let mut entry = ClassEntry::new(name, Some(OBJECT), &[]);
    entry.access |= INTERFACE;
    entry
}

fn resolver() -> SymbolResolver<'static> {
    SymbolResolver::new(&MAPPINGS, &GRAPH)
}

fn method(
    resolver: &SymbolResolver<'_>,
    owner: &str,
    name: &str,
    descriptor: &str,
) -> Option<String> {
    resolver
        .resolve_method(owner, name, descriptor)
        .unwrap()
        .new_name()
        .map(str::to_owned)
}

fn field(
    resolver: &SymbolResolver<'_>,
    owner: &str,
    name: &str,
    descriptor: &str,
) -> Option<String> {
    resolver
        .resolve_field(owner, name, descriptor)
        .unwrap()
        .new_name()
        .map(str::to_owned)
}

#[test]
fn test_classes() {
    let resolver = resolver();
    assert_eq!(resolver.class_name("shape"), "com/example/Shape");
    assert_eq!(resolver.class_name("lib/util/Strings"), "com/example/lib/util/Strings");
    assert_eq!(resolver.class_name("shape$Builder"), "com/example/Shape$Builder");
    // renaming is never inherited
    assert_eq!(resolver.class_name("square"), "square");
    assert_eq!(
        resolver.remap_type("[[Lshape;").unwrap(),
        "[[Lcom/example/Shape;"
    );
    assert_eq!(GRAPH.get("shape").unwrap().new_name.as_deref(), Some("com/example/Shape"));
}

#[test]
fn test_inherited_methods() {
    let resolver = resolver();
    // overrides and references through subclasses
    for owner in ["shape", "square", "cube", "circle", "printer"] {
        assert_eq!(
            method(&resolver, owner, "area", "()D").as_deref(),
            Some("computeArea"),
            "{owner}.area"
        );
    }
    // an override takes the name of the method it overrides
    assert_eq!(
        method(&resolver, "cube", "scale", "(D)Lshape;").as_deref(),
        Some("resize")
    );
    assert_eq!(method(&resolver, "shape", "area", "(I)D"), None);
}

#[test]
fn test_override_family() {
    let resolver = resolver();
    // only the override in `square` has an entry
    assert_eq!(
        method(&resolver, "shape", "scale", "(D)Lshape;").as_deref(),
        Some("resize")
    );
    assert_eq!(
        method(&resolver, "printer", "scale", "(D)Lshape;").as_deref(),
        Some("resize")
    );
    // `logger` only shares the interface with the mapped owner
    assert_eq!(
        method(&resolver, "logger", "visit", "(Lshape;)V").as_deref(),
        Some("accept")
    );
    assert_eq!(
        method(&resolver, "printer", "visit", "(Lshape;)V").as_deref(),
        Some("accept")
    );
}

#[test]
fn test_inherited_implementation_of_renamed_interface_method() {
    // `task` gets `execute` from `worker` and implements `job.execute`
    let mappings =
        MappingTable::from_records([MappingRecord::method("job", "execute", "()V", "run")])
            .unwrap();
    let mut builder = HierarchyBuilder::new();
    builder
        .add_class(
            ClassEntry::new("worker", Some(OBJECT), &[]).with_method("execute", "()V", PUBLIC),
        )
        .add_class(interface("job").with_method("execute", "()V", PUBLIC | ABSTRACT))
        .add_class(ClassEntry::new("task", Some("worker"), &["job"]))
        .add_class(ClassEntry::new("helper", Some("worker"), &[]))
        .add_class(
            ClassEntry::new("timer", Some(OBJECT), &[]).with_method("execute", "()V", PUBLIC),
        );
    let graph = builder.build(&mappings);
    let resolver = SymbolResolver::new(&mappings, &graph);

    for owner in ["worker", "job", "task", "helper"] {
        assert_eq!(
            method(&resolver, owner, "execute", "()V").as_deref(),
            Some("run"),
            "{owner}.execute"
        );
    }
    assert_eq!(method(&resolver, "timer", "execute", "()V"), None);
}

#[test]
fn test_static_and_private_methods() {
    let resolver = resolver();
    // a static method reached through a subclass
    assert_eq!(
        method(&resolver, "square", "create", "()Lshape;").as_deref(),
        Some("newInstance")
    );
    // the private method of `shape` is unrelated to `circle.hidden`
    assert_eq!(method(&resolver, "circle", "hidden", "()V"), None);
}

#[test]
fn test_fields() {
    let resolver = resolver();
    assert_eq!(field(&resolver, "shape", "id", "I").as_deref(), Some("identifier"));
    assert_eq!(field(&resolver, "square", "id", "I").as_deref(), Some("identifier"));
    // `cube` hides the inherited field
    assert_eq!(field(&resolver, "cube", "id", "I"), None);
    assert_eq!(field(&resolver, "circle", "r", "D").as_deref(), Some("radius"));
    assert_eq!(field(&resolver, "circle", "r", "J").as_deref(), Some("radius"));
}

#[test]
fn test_malformed_descriptor() {
    let resolver = resolver();
    let error = resolver.resolve_method("shape", "area", "()").unwrap_err();
    assert_eq!(error.descriptor(), "()");
    assert!(resolver.resolve_field("shape", "id", "Lshape").is_err());
}

#[test]
fn test_cold_and_warm_caches_agree() {
    let owners = [
        "shape", "square", "cube", "circle", "printer", "logger", "visitor",
    ];
    let keys: Vec<(&str, &str, &str)> = owners
        .into_iter()
        .flat_map(|owner| {
            [
                (owner, "area", "()D"),
                (owner, "scale", "(D)Lshape;"),
                (owner, "visit", "(Lshape;)V"),
                (owner, "create", "()Lshape;"),
                (owner, "hidden", "()V"),
            ]
        })
        .collect();

    let cold = resolver();
    let first: Vec<ResolvedMapping> = keys
        .iter()
        .map(|(owner, name, descriptor)| cold.resolve_method(owner, name, descriptor).unwrap())
        .collect();
    let cached = cold.cached_entries();
    let warm: Vec<ResolvedMapping> = keys
        .iter()
        .map(|(owner, name, descriptor)| cold.resolve_method(owner, name, descriptor).unwrap())
        .collect();
    assert_eq!(first, warm);
    assert_eq!(cold.cached_entries(), cached);

    // resolving concurrently and in reverse order gives the same answers
    let concurrent = resolver();
    let parallel: Vec<ResolvedMapping> = keys
        .par_iter()
        .rev()
        .map(|(owner, name, descriptor)| {
            concurrent.resolve_method(owner, name, descriptor).unwrap()
        })
        .collect();
    let mut parallel = parallel;
    parallel.reverse();
    assert_eq!(first, parallel);
}

#[test]
fn test_cycle_terminates() {
    let mappings =
        MappingTable::from_records([MappingRecord::method("x", "m", "()V", "n")]).unwrap();
    let mut builder = HierarchyBuilder::new();
    builder
        .add_class(ClassEntry::new("x", Some("y"), &[]))
        .add_class(ClassEntry::new("y", Some("x"), &[]).with_method("m", "()V", PUBLIC));
    let graph = builder.build(&mappings);
    assert_eq!(graph.cycles(), ["x", "y"]);

    let resolver = SymbolResolver::new(&mappings, &graph);
    assert_eq!(
        resolver.resolve_method("y", "m", "()V").unwrap().new_name(),
        Some("n")
    );
}
