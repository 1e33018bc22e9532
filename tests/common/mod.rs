#![allow(dead_code)]

use remapper::classfile::{
    access, Attribute, AttributeBody, BootstrapMethod, ClassFile, Code, Constant, InnerClass,
    Member,
};
use remapper::ArchiveEntry;

pub const OBJECT: &str = "java/lang/Object";

/// An instruction with a constant pool operand.
pub enum Insn<'a> {
    GetField(&'a str, &'a str, &'a str),
    GetStatic(&'a str, &'a str, &'a str),
    InvokeVirtual(&'a str, &'a str, &'a str),
    InvokeSpecial(&'a str, &'a str, &'a str),
    InvokeStatic(&'a str, &'a str, &'a str),
    InvokeInterface(&'a str, &'a str, &'a str),
    New(&'a str),
    CheckCast(&'a str),
    /// A lambda for `interface.sam` implemented by a static method of the
    /// class being built: (indy name, indy descriptor, erased SAM descriptor,
    /// implementation name, implementation descriptor).
    Lambda(&'a str, &'a str, &'a str, &'a str, &'a str),
}

/// Assembles class files through the crate's own class model.
pub struct ClassBuilder {
    class: ClassFile,
    bootstrap: Vec<BootstrapMethod>,
    inner_classes: Vec<InnerClass>,
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: &str) -> Self {
        Self::with_flags(name, Some(super_name), access::PUBLIC | access::SUPER)
    }

    pub fn interface(name: &str) -> Self {
        Self::with_flags(
            name,
            Some(OBJECT),
            access::PUBLIC | access::INTERFACE | access::ABSTRACT,
        )
    }

    pub fn with_flags(name: &str, super_name: Option<&str>, flags: u16) -> Self {
        Self {
            class: ClassFile::new(name, super_name, flags).unwrap(),
            bootstrap: Vec::new(),
            inner_classes: Vec::new(),
        }
    }

    pub fn implements(mut self, interface: &str) -> Self {
        let index = self.class.pool.class(interface).unwrap();
        self.class.interfaces.push(index);
        self
    }

    pub fn field(mut self, flags: u16, name: &str, descriptor: &str) -> Self {
        self.class
            .add_member(false, flags, name, descriptor, Vec::new())
            .unwrap();
        self
    }

    pub fn abstract_method(mut self, name: &str, descriptor: &str) -> Self {
        self.class
            .add_member(
                true,
                access::PUBLIC | access::ABSTRACT,
                name,
                descriptor,
                Vec::new(),
            )
            .unwrap();
        self
    }

    pub fn method(mut self, flags: u16, name: &str, descriptor: &str, body: &[Insn<'_>]) -> Self {
        let mut code = vec![0x2a];
        for insn in body {
            self.emit(insn, &mut code);
        }
        code.push(0xb1);
        let code = self
            .class
            .make_attribute(
                "Code",
                AttributeBody::Code(Code {
                    max_stack: 4,
                    max_locals: 4,
                    code,
                    exception_table: Vec::new(),
                    attributes: Vec::new(),
                }),
            )
            .unwrap();
        self.class
            .add_member(true, flags, name, descriptor, vec![code])
            .unwrap();
        self
    }

    pub fn signature(mut self, signature: &str) -> Self {
        let signature_index = self.class.pool.utf8(signature).unwrap();
        self.class
            .add_attribute("Signature", AttributeBody::Signature { signature_index })
            .unwrap();
        self
    }

    /// Records `inner` as a member class of `outer` with the given simple name.
    pub fn inner_class(mut self, inner: &str, outer: Option<&str>, simple: Option<&str>) -> Self {
        let pool = &mut self.class.pool;
        self.inner_classes.push(InnerClass {
            inner_class_info_index: pool.class(inner).unwrap(),
            outer_class_info_index: outer.map_or(0, |outer| pool.class(outer).unwrap()),
            inner_name_index: simple.map_or(0, |simple| pool.utf8(simple).unwrap()),
            access_flags: access::PUBLIC | access::STATIC,
        });
        self
    }

    pub fn attribute(mut self, name: &str, body: AttributeBody) -> Self {
        self.class.add_attribute(name, body).unwrap();
        self
    }

    pub fn pool(&mut self) -> &mut remapper::classfile::ConstantPool {
        &mut self.class.pool
    }

    pub fn build(mut self) -> ClassFile {
        if !self.inner_classes.is_empty() {
            let classes = std::mem::take(&mut self.inner_classes);
            self.class
                .add_attribute("InnerClasses", AttributeBody::InnerClasses(classes))
                .unwrap();
        }
        if !self.bootstrap.is_empty() {
            let methods = std::mem::take(&mut self.bootstrap);
            self.class
                .add_attribute("BootstrapMethods", AttributeBody::BootstrapMethods(methods))
                .unwrap();
        }
        self.class
    }

    pub fn entry(self) -> ArchiveEntry {
        let class = self.build();
        entry_of(&class)
    }

    fn emit(&mut self, insn: &Insn<'_>, code: &mut Vec<u8>) {
        let pool = &mut self.class.pool;
        let (opcode, index, padding) = match *insn {
            Insn::GetField(owner, name, descriptor) => {
                (0xb4, pool.field_ref(owner, name, descriptor).unwrap(), 0)
            }
            Insn::GetStatic(owner, name, descriptor) => {
                (0xb2, pool.field_ref(owner, name, descriptor).unwrap(), 0)
            }
            Insn::InvokeVirtual(owner, name, descriptor) => {
                (0xb6, pool.method_ref(owner, name, descriptor, false).unwrap(), 0)
            }
            Insn::InvokeSpecial(owner, name, descriptor) => {
                (0xb7, pool.method_ref(owner, name, descriptor, false).unwrap(), 0)
            }
            Insn::InvokeStatic(owner, name, descriptor) => {
                (0xb8, pool.method_ref(owner, name, descriptor, false).unwrap(), 0)
            }
            Insn::InvokeInterface(owner, name, descriptor) => {
                (0xb9, pool.method_ref(owner, name, descriptor, true).unwrap(), 2)
            }
            Insn::New(class) => (0xbb, pool.class(class).unwrap(), 0),
            Insn::CheckCast(class) => (0xc0, pool.class(class).unwrap(), 0),
            Insn::Lambda(name, descriptor, sam, implementation, implementation_descriptor) => {
                let factory = pool
                    .method_ref(
                        "java/lang/invoke/LambdaMetafactory",
                        "metafactory",
                        "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;",
                        false,
                    )
                    .unwrap();
                let method_ref = pool.method_handle(6, factory).unwrap();
                let owner = self.class.name().unwrap().to_owned();
                let pool = &mut self.class.pool;
                let target = pool
                    .method_ref(&owner, implementation, implementation_descriptor, false)
                    .unwrap();
                let arguments = vec![
                    pool.method_type(sam).unwrap(),
                    pool.method_handle(6, target).unwrap(),
                    pool.method_type(sam).unwrap(),
                ];
                let bootstrap_index = self.bootstrap.len() as u16;
                self.bootstrap.push(BootstrapMethod {
                    method_ref,
                    arguments,
                });
                let index = self
                    .class
                    .pool
                    .invoke_dynamic(bootstrap_index, name, descriptor)
                    .unwrap();
                (0xba, index, 2)
            }
        };
        code.push(opcode);
        code.extend_from_slice(&index.to_be_bytes());
        code.extend(std::iter::repeat(0).take(padding));
    }
}

pub fn entry_of(class: &ClassFile) -> ArchiveEntry {
    ArchiveEntry::new(
        format!("{}.class", class.name().unwrap()),
        class.to_bytes().unwrap(),
    )
}

pub fn parse(entry: &ArchiveEntry) -> ClassFile {
    ClassFile::parse(&entry.bytes).unwrap()
}

/// `(owner, name, descriptor)` of every member reference in the pool.
pub fn member_refs(class: &ClassFile) -> Vec<(String, String, String)> {
    class
        .pool
        .iter()
        .filter(|(_, constant)| {
            matches!(
                constant,
                Constant::FieldRef { .. }
                    | Constant::MethodRef { .. }
                    | Constant::InterfaceMethodRef { .. }
            )
        })
        .map(|(index, _)| {
            let member = class.pool.member_ref_at(index).unwrap();
            (
                member.owner.to_owned(),
                member.name.to_owned(),
                member.descriptor.to_owned(),
            )
        })
        .collect()
}

/// Names of every `Class` constant in the pool.
pub fn class_constants(class: &ClassFile) -> Vec<String> {
    class
        .pool
        .iter()
        .filter_map(|(index, constant)| match constant {
            Constant::Class { .. } => Some(class.pool.class_name_at(index).unwrap().to_owned()),
            _ => None,
        })
        .collect()
}

/// `name descriptor` of every declared method.
pub fn methods(class: &ClassFile) -> Vec<String> {
    describe(class, &class.methods)
}

/// `name descriptor` of every declared field.
pub fn fields(class: &ClassFile) -> Vec<String> {
    describe(class, &class.fields)
}

fn describe(class: &ClassFile, members: &[Member]) -> Vec<String> {
    members
        .iter()
        .map(|member| {
            format!(
                "{} {}",
                member.name(&class.pool).unwrap(),
                member.descriptor(&class.pool).unwrap()
            )
        })
        .collect()
}

/// The body of the first class attribute with the given name.
pub fn class_attribute<'c>(class: &'c ClassFile, name: &str) -> Option<&'c AttributeBody> {
    find_attribute(class, &class.attributes, name)
}

pub fn find_attribute<'c>(
    class: &'c ClassFile,
    attributes: &'c [Attribute],
    name: &str,
) -> Option<&'c AttributeBody> {
    attributes
        .iter()
        .find(|attribute| class.pool.utf8_at(attribute.name_index).ok() == Some(name))
        .map(|attribute| &attribute.body)
}

/// The method code of the first method with the given name.
pub fn code_of<'c>(class: &'c ClassFile, name: &str) -> &'c Code {
    let method = class
        .methods
        .iter()
        .find(|method| method.name(&class.pool).unwrap() == name)
        .unwrap();
    match find_attribute(class, &method.attributes, "Code") {
        Some(AttributeBody::Code(code)) => code,
        _ => panic!("{name} has no code"),
    }
}
