mod common;

use remapper::classfile::access;
use remapper::{compare_builds, ArchiveEntry, CompareError, MappingRecord, MappingTable, Remapper};

use common::{ClassBuilder, Insn, OBJECT};

fn program() -> Vec<ArchiveEntry> {
    vec![
        ArchiveEntry::new("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n\n".to_vec()),
        ClassBuilder::new("com/example/Account", OBJECT)
            .field(access::PRIVATE, "balance", "J")
            .field(access::PRIVATE, "owner", "Lcom/example/Person;")
            .method(
                access::PUBLIC,
                "<init>",
                "()V",
                &[Insn::InvokeSpecial(OBJECT, "<init>", "()V")],
            )
            .method(
                access::PUBLIC,
                "transfer",
                "(Lcom/example/Account;J)V",
                &[Insn::GetField("com/example/Account", "balance", "J")],
            )
            .entry(),
        ClassBuilder::new("com/example/Person", OBJECT)
            .field(access::PRIVATE, "name", "Ljava/lang/String;")
            .method(access::PUBLIC, "name", "()Ljava/lang/String;", &[])
            .entry(),
    ]
}

fn obfuscation() -> MappingTable {
    MappingTable::from_records([
        MappingRecord::class("com/example/Account", "a"),
        MappingRecord::class("com/example/Person", "b"),
        MappingRecord::field("com/example/Account", "balance", "J", "a"),
        MappingRecord::field("com/example/Account", "owner", "Lcom/example/Person;", "b"),
        MappingRecord::method("com/example/Account", "transfer", "(Lcom/example/Account;J)V", "a"),
        MappingRecord::field("com/example/Person", "name", "Ljava/lang/String;", "a"),
        MappingRecord::method("com/example/Person", "name", "()Ljava/lang/String;", "a"),
    ])
    .unwrap()
}

#[test]
fn test_recovers_obfuscation_mapping() {
    let table = obfuscation();
    let obfuscated = Remapper::new(table.clone()).remap(program()).unwrap().entries;

    let derived = compare_builds(&program(), &obfuscated).unwrap();
    assert_eq!(derived.records(), table.records());

    // the derived table undoes the obfuscation when applied in reverse
    let restored = Remapper::new(derived.reversed().unwrap())
        .remap(obfuscated)
        .unwrap()
        .entries;
    let paths: Vec<&str> = restored.iter().map(|entry| entry.path.as_str()).collect();
    assert_eq!(
        paths,
        ["META-INF/MANIFEST.MF", "com/example/Account.class", "com/example/Person.class"]
    );
}

#[test]
fn test_rejects_builds_of_different_programs() {
    let mut other = program();
    other[2] = ClassBuilder::new("b", OBJECT)
        .field(access::PRIVATE, "a", "Ljava/lang/String;")
        .entry();
    let error = compare_builds(&program(), &other).unwrap_err();
    assert!(matches!(error, CompareError::MemberCount { .. }), "{error}");

    let mut truncated = program();
    truncated[1].bytes.truncate(10);
    let error = compare_builds(&truncated, &program()).unwrap_err();
    match error {
        CompareError::MalformedClass { path, .. } => assert_eq!(path, "com/example/Account.class"),
        other => panic!("unexpected error {other}"),
    }
}
