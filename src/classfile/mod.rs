//! A structural model of the JVM class file format.
//!
//! [`ClassFile::parse`] keeps enough of the original structure that
//! [`ClassFile::to_bytes`] reproduces the input exactly when nothing was
//! changed. Bytecode is kept opaque.

mod attribute;
mod bytes;
mod pool;

use thiserror::Error;

pub use attribute::{
    Annotation, Attribute, AttributeBody, BootstrapMethod, Code, ElementValue, InnerClass,
    LocalVariable, RecordComponent, TypeAnnotation,
};
pub use pool::{Constant, ConstantPool, JavaUtf8, MemberRef, RefKind};

use attribute::{read_attributes, write_attributes};
use bytes::{write_count, write_u2, write_u4, ByteReader};

const MAGIC: u32 = 0xCAFE_BABE;

/// Access flag bits used by the remapper.
pub mod access {
    /// `ACC_PUBLIC`
    pub const PUBLIC: u16 = 0x0001;
    /// `ACC_PRIVATE`
    pub const PRIVATE: u16 = 0x0002;
    /// `ACC_PROTECTED`
    pub const PROTECTED: u16 = 0x0004;
    /// `ACC_STATIC`
    pub const STATIC: u16 = 0x0008;
    /// `ACC_FINAL`
    pub const FINAL: u16 = 0x0010;
    /// `ACC_SUPER` on classes.
    pub const SUPER: u16 = 0x0020;
    /// `ACC_INTERFACE`
    pub const INTERFACE: u16 = 0x0200;
    /// `ACC_ABSTRACT`
    pub const ABSTRACT: u16 = 0x0400;
    /// `ACC_SYNTHETIC`
    pub const SYNTHETIC: u16 = 0x1000;
    /// `ACC_ENUM`
    pub const ENUM: u16 = 0x4000;
    /// `ACC_MODULE`
    pub const MODULE: u16 = 0x8000;
}

/// Error for bytes that do not form a well-structured class file.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ClassFormatError {
    /// The input ended in the middle of a structure.
    #[error("unexpected end of class data")]
    UnexpectedEof,
    /// The input does not start with `0xCAFEBABE`.
    #[error("invalid magic 0x{0:08x}")]
    InvalidMagic(u32),
    /// An unknown constant pool tag.
    #[error("invalid constant pool tag {tag} at index {index}")]
    InvalidConstantTag {
        /// Pool index of the entry.
        index: u16,
        /// The tag byte.
        tag: u8,
    },
    /// A reference to a missing or unusable pool slot.
    #[error("invalid constant pool index {0}")]
    InvalidConstantIndex(u16),
    /// A reference to a pool entry of the wrong type.
    #[error("constant pool entry {index} is not a {expected}")]
    ConstantTypeMismatch {
        /// Pool index of the entry.
        index: u16,
        /// The expected entry type.
        expected: &'static str,
    },
    /// A `Utf8` entry whose bytes are not valid modified UTF-8.
    #[error("constant pool entry {0} is not valid modified UTF-8")]
    InvalidUtf8(u16),
    /// A known attribute with an inconsistent body.
    #[error("invalid {name} attribute: {reason}")]
    InvalidAttribute {
        /// Attribute name.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// Bytes follow the last class attribute.
    #[error("trailing bytes after class structure")]
    TrailingBytes,
    /// The constant pool would exceed 65535 slots.
    #[error("constant pool exceeds 65535 entries")]
    ConstantPoolOverflow,
    /// A table or attribute exceeds the limits of its length field.
    #[error("{0} exceeds class file limits")]
    TooLarge(&'static str),
}

/// A field or method declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    /// Access flags.
    pub access_flags: u16,
    /// `Utf8` name.
    pub name_index: u16,
    /// `Utf8` descriptor.
    pub descriptor_index: u16,
    /// Declaration attributes.
    pub attributes: Vec<Attribute>,
}

impl Member {
    /// The member name.
    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, ClassFormatError> {
        pool.utf8_at(self.name_index)
    }

    /// The member descriptor.
    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, ClassFormatError> {
        pool.utf8_at(self.descriptor_index)
    }
}

/// A parsed class file.
#[derive(Clone, Debug)]
pub struct ClassFile {
    /// Minor version.
    pub minor_version: u16,
    /// Major version.
    pub major_version: u16,
    /// The constant pool.
    pub pool: ConstantPool,
    /// Class access flags.
    pub access_flags: u16,
    /// `Class` entry of this class.
    pub this_class: u16,
    /// `Class` entry of the superclass, 0 for `java/lang/Object` and modules.
    pub super_class: u16,
    /// `Class` entries of the direct superinterfaces.
    pub interfaces: Vec<u16>,
    /// Declared fields.
    pub fields: Vec<Member>,
    /// Declared methods.
    pub methods: Vec<Member>,
    /// Class attributes.
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Creates an empty class extending `super_name`.
    pub fn new(
        name: &str,
        super_name: Option<&str>,
        access_flags: u16,
    ) -> Result<Self, ClassFormatError> {
        let mut pool = ConstantPool::new();
        let this_class = pool.class(name)?;
        let super_class = match super_name {
            Some(super_name) => pool.class(super_name)?,
            None => 0,
        };
        Ok(Self {
            minor_version: 0,
            major_version: 52,
            pool,
            access_flags,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    /// Parses a complete class file.
    pub fn parse(data: &[u8]) -> Result<Self, ClassFormatError> {
        let mut reader = ByteReader::new(data);
        let magic = reader.u4()?;
        if magic != MAGIC {
            return Err(ClassFormatError::InvalidMagic(magic));
        }
        let minor_version = reader.u2()?;
        let major_version = reader.u2()?;
        let pool = ConstantPool::read(&mut reader)?;
        let access_flags = reader.u2()?;
        let this_class = reader.u2()?;
        let super_class = reader.u2()?;
        let interfaces = reader.list(|r| r.u2())?;
        let fields = reader.list(|r| read_member(r, &pool))?;
        let methods = reader.list(|r| read_member(r, &pool))?;
        let attributes = read_attributes(&mut reader, &pool)?;
        if !reader.is_empty() {
            return Err(ClassFormatError::TrailingBytes);
        }

        let class = Self {
            minor_version,
            major_version,
            pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        // fail early on dangling names
        class.name()?;
        class.super_name()?;
        class.interface_names()?;
        Ok(class)
    }

    /// Serializes the class.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ClassFormatError> {
        let mut out = Vec::with_capacity(1024);
        write_u4(&mut out, MAGIC);
        write_u2(&mut out, self.minor_version);
        write_u2(&mut out, self.major_version);
        self.pool.write(&mut out)?;
        write_u2(&mut out, self.access_flags);
        write_u2(&mut out, self.this_class);
        write_u2(&mut out, self.super_class);
        write_count(&mut out, self.interfaces.len(), "interfaces")?;
        for interface in &self.interfaces {
            write_u2(&mut out, *interface);
        }
        for members in [&self.fields, &self.methods] {
            write_count(&mut out, members.len(), "members")?;
            for member in members {
                write_u2(&mut out, member.access_flags);
                write_u2(&mut out, member.name_index);
                write_u2(&mut out, member.descriptor_index);
                write_attributes(&mut out, &member.attributes)?;
            }
        }
        write_attributes(&mut out, &self.attributes)?;
        Ok(out)
    }

    /// Internal name of this class.
    pub fn name(&self) -> Result<&str, ClassFormatError> {
        self.pool.class_name_at(self.this_class)
    }

    /// Internal name of the superclass.
    pub fn super_name(&self) -> Result<Option<&str>, ClassFormatError> {
        match self.super_class {
            0 => Ok(None),
            index => self.pool.class_name_at(index).map(Some),
        }
    }

    /// Internal names of the direct superinterfaces.
    pub fn interface_names(&self) -> Result<Vec<&str>, ClassFormatError> {
        self.interfaces
            .iter()
            .map(|index| self.pool.class_name_at(*index))
            .collect()
    }

    /// Whether this is a `module-info` class.
    pub fn is_module(&self) -> bool {
        self.access_flags & access::MODULE != 0
    }

    /// Entries of the `BootstrapMethods` attribute, if present.
    pub fn bootstrap_methods(&self) -> &[BootstrapMethod] {
        self.attributes
            .iter()
            .find_map(|attribute| match &attribute.body {
                AttributeBody::BootstrapMethods(methods) => Some(methods.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Adds a declaration with the given name and descriptor.
    pub fn add_member(
        &mut self,
        method: bool,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        attributes: Vec<Attribute>,
    ) -> Result<(), ClassFormatError> {
        let member = Member {
            access_flags,
            name_index: self.pool.utf8(name)?,
            descriptor_index: self.pool.utf8(descriptor)?,
            attributes,
        };
        if method {
            self.methods.push(member);
        } else {
            self.fields.push(member);
        }
        Ok(())
    }

    /// Adds a class attribute whose name is interned in the pool.
    pub fn add_attribute(
        &mut self,
        name: &str,
        body: AttributeBody,
    ) -> Result<(), ClassFormatError> {
        let attribute = self.make_attribute(name, body)?;
        self.attributes.push(attribute);
        Ok(())
    }

    /// Builds an attribute whose name is interned in the pool.
    pub fn make_attribute(
        &mut self,
        name: &str,
        body: AttributeBody,
    ) -> Result<Attribute, ClassFormatError> {
        Ok(Attribute {
            name_index: self.pool.utf8(name)?,
            body,
        })
    }
}

fn read_member(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> Result<Member, ClassFormatError> {
    let access_flags = reader.u2()?;
    let name_index = reader.u2()?;
    let descriptor_index = reader.u2()?;
    let attributes = read_attributes(reader, pool)?;
    let member = Member {
        access_flags,
        name_index,
        descriptor_index,
        attributes,
    };
    member.name(pool)?;
    member.descriptor(pool)?;
    Ok(member)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ClassFile {
        let mut class =
            ClassFile::new("a/B", Some("java/lang/Object"), access::PUBLIC | access::SUPER)
                .unwrap();
        let runnable = class.pool.class("java/lang/Runnable").unwrap();
        class.interfaces.push(runnable);
        class
            .add_member(false, access::PRIVATE, "count", "J", Vec::new())
            .unwrap();
        let target = class.pool.method_ref("a/C", "run", "()V", false).unwrap();
        let code = Code {
            max_stack: 1,
            max_locals: 1,
            code: vec![0x2a, 0xb7, (target >> 8) as u8, target as u8, 0xb1],
            exception_table: Vec::new(),
            attributes: Vec::new(),
        };
        let code = class.make_attribute("Code", AttributeBody::Code(code)).unwrap();
        class
            .add_member(true, access::PUBLIC, "run", "()V", vec![code])
            .unwrap();
        class.pool.add(Constant::Double(1.5f64.to_bits())).unwrap();
        class
            .add_attribute("SourceFile", AttributeBody::Raw(vec![0, 1]))
            .unwrap();
        class
    }

    #[test]
    fn test_parse_write_roundtrip() {
        let bytes = sample().to_bytes().unwrap();
        let parsed = ClassFile::parse(&bytes).unwrap();
        assert_eq!(parsed.name().unwrap(), "a/B");
        assert_eq!(parsed.super_name().unwrap(), Some("java/lang/Object"));
        assert_eq!(parsed.interface_names().unwrap(), vec!["java/lang/Runnable"]);
        assert_eq!(parsed.fields.len(), 1);
        assert_eq!(parsed.methods[0].name(&parsed.pool).unwrap(), "run");
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            ClassFile::parse(&[0xCA, 0xFE, 0xBA, 0xBF]),
            Err(ClassFormatError::InvalidMagic(0xCAFE_BABF))
        ));
        let mut bytes = sample().to_bytes().unwrap();
        bytes.push(0);
        assert_eq!(ClassFile::parse(&bytes).unwrap_err(), ClassFormatError::TrailingBytes);
        bytes.truncate(bytes.len() - 10);
        assert!(ClassFile::parse(&bytes).is_err());
    }

    #[test]
    fn test_module_flag() {
        let class = ClassFile::new("module-info", None, access::MODULE).unwrap();
        assert!(class.is_module());
        assert_eq!(class.super_name().unwrap(), None);
        assert!(class.bootstrap_methods().is_empty());
    }
}
