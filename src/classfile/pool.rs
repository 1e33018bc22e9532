//! The constant pool, with lookup helpers and interning of new entries.

use std::collections::HashMap;

use super::bytes::{write_count, write_u1, write_u2, write_u4, ByteReader};
use super::ClassFormatError;

/// Text of a `CONSTANT_Utf8` entry.
///
/// The raw modified UTF-8 bytes are kept as read so that untouched entries
/// are written back unchanged. `text` is `None` for byte sequences that do
/// not decode to valid Unicode (for example unpaired surrogates).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JavaUtf8 {
    bytes: Vec<u8>,
    text: Option<String>,
}

impl JavaUtf8 {
    /// Encodes `text` as modified UTF-8.
    pub fn new(text: &str) -> Self {
        Self {
            bytes: encode_modified_utf8(text),
            text: Some(text.to_owned()),
        }
    }

    /// Wraps raw modified UTF-8 bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let text = decode_modified_utf8(&bytes);
        Self { bytes, text }
    }

    /// The decoded text, if the bytes are valid.
    pub fn as_str(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// The modified UTF-8 encoding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// A single constant pool entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Constant {
    /// Slot 0 and the slot following a `Long` or `Double`.
    Unusable,
    Utf8(JavaUtf8),
    Integer(i32),
    /// Raw IEEE 754 bits.
    Float(u32),
    Long(i64),
    /// Raw IEEE 754 bits.
    Double(u64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    FieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    MethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
}

impl Constant {
    fn slots(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Which kind of member a reference constant points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefKind {
    /// `CONSTANT_Fieldref`
    Field,
    /// `CONSTANT_Methodref`
    Method,
    /// `CONSTANT_InterfaceMethodref`
    InterfaceMethod,
}

/// A resolved field or method reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemberRef<'p> {
    /// The reference constant type.
    pub kind: RefKind,
    /// Internal name (or array descriptor) of the owner.
    pub owner: &'p str,
    /// Member name.
    pub name: &'p str,
    /// Member descriptor.
    pub descriptor: &'p str,
}

/// A class file constant pool.
///
/// Adding an entry returns the index of an equal existing entry when there is
/// one, so that appended text is shared between all of its users.
#[derive(Clone, Debug)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    interned: HashMap<Constant, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// Creates a pool holding only the reserved slot 0.
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
            interned: HashMap::new(),
        }
    }

    /// The `constant_pool_count`, one more than the highest index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool holds no entries besides slot 0.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Iterates over all usable entries with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, constant)| !matches!(constant, Constant::Unusable))
            .map(|(index, constant)| (index as u16, constant))
    }

    /// Returns the entry at `index`.
    pub fn get(&self, index: u16) -> Result<&Constant, ClassFormatError> {
        match self.entries.get(index as usize) {
            None | Some(Constant::Unusable) => Err(ClassFormatError::InvalidConstantIndex(index)),
            Some(constant) => Ok(constant),
        }
    }

    /// The decoded text of the `Utf8` entry at `index`.
    pub fn utf8_at(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.get(index)? {
            Constant::Utf8(utf8) => utf8
                .as_str()
                .ok_or(ClassFormatError::InvalidUtf8(index)),
            _ => Err(ClassFormatError::ConstantTypeMismatch {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// The name stored in the `Class` entry at `index`.
    pub fn class_name_at(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8_at(*name_index),
            _ => Err(ClassFormatError::ConstantTypeMismatch {
                index,
                expected: "Class",
            }),
        }
    }

    /// The name and descriptor of the `NameAndType` entry at `index`.
    pub fn name_and_type_at(&self, index: u16) -> Result<(&str, &str), ClassFormatError> {
        match self.get(index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8_at(*name_index)?, self.utf8_at(*descriptor_index)?)),
            _ => Err(ClassFormatError::ConstantTypeMismatch {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// The field or method reference at `index`.
    pub fn member_ref_at(&self, index: u16) -> Result<MemberRef<'_>, ClassFormatError> {
        let (kind, class_index, name_and_type_index) = match self.get(index)? {
            Constant::FieldRef {
                class_index,
                name_and_type_index,
            } => (RefKind::Field, *class_index, *name_and_type_index),
            Constant::MethodRef {
                class_index,
                name_and_type_index,
            } => (RefKind::Method, *class_index, *name_and_type_index),
            Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => (RefKind::InterfaceMethod, *class_index, *name_and_type_index),
            _ => {
                return Err(ClassFormatError::ConstantTypeMismatch {
                    index,
                    expected: "member reference",
                })
            }
        };
        let owner = self.class_name_at(class_index)?;
        let (name, descriptor) = self.name_and_type_at(name_and_type_index)?;
        Ok(MemberRef {
            kind,
            owner,
            name,
            descriptor,
        })
    }

    /// Adds `constant`, or returns the index of an equal entry.
    pub fn add(&mut self, constant: Constant) -> Result<u16, ClassFormatError> {
        if let Some(index) = self.interned.get(&constant) {
            return Ok(*index);
        }
        let index = self.push(constant.clone())?;
        self.interned.insert(constant, index);
        Ok(index)
    }

    /// Adds a `Utf8` entry.
    pub fn utf8(&mut self, text: &str) -> Result<u16, ClassFormatError> {
        self.add(Constant::Utf8(JavaUtf8::new(text)))
    }

    /// Adds a `Class` entry.
    pub fn class(&mut self, name: &str) -> Result<u16, ClassFormatError> {
        let name_index = self.utf8(name)?;
        self.add(Constant::Class { name_index })
    }

    /// Adds a `String` entry.
    pub fn string(&mut self, text: &str) -> Result<u16, ClassFormatError> {
        let string_index = self.utf8(text)?;
        self.add(Constant::String { string_index })
    }

    /// Adds a `NameAndType` entry.
    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, ClassFormatError> {
        let name_index = self.utf8(name)?;
        let descriptor_index = self.utf8(descriptor)?;
        self.add(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    /// Adds a `Fieldref` entry.
    pub fn field_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ClassFormatError> {
        let class_index = self.class(owner)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.add(Constant::FieldRef {
            class_index,
            name_and_type_index,
        })
    }

    /// Adds a `Methodref`, or an `InterfaceMethodref` if `interface` is set.
    pub fn method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<u16, ClassFormatError> {
        let class_index = self.class(owner)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.add(if interface {
            Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            }
        } else {
            Constant::MethodRef {
                class_index,
                name_and_type_index,
            }
        })
    }

    /// Adds a `MethodType` entry.
    pub fn method_type(&mut self, descriptor: &str) -> Result<u16, ClassFormatError> {
        let descriptor_index = self.utf8(descriptor)?;
        self.add(Constant::MethodType { descriptor_index })
    }

    /// Adds a `MethodHandle` entry.
    pub fn method_handle(
        &mut self,
        reference_kind: u8,
        reference_index: u16,
    ) -> Result<u16, ClassFormatError> {
        self.add(Constant::MethodHandle {
            reference_kind,
            reference_index,
        })
    }

    /// Adds an `InvokeDynamic` entry.
    pub fn invoke_dynamic(
        &mut self,
        bootstrap_method_attr_index: u16,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ClassFormatError> {
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.add(Constant::InvokeDynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        })
    }

    /// Overwrites the entry at `index` in place.
    pub(crate) fn replace(
        &mut self,
        index: u16,
        constant: Constant,
    ) -> Result<(), ClassFormatError> {
        let slot = self
            .entries
            .get_mut(index as usize)
            .filter(|slot| !matches!(slot, Constant::Unusable))
            .ok_or(ClassFormatError::InvalidConstantIndex(index))?;
        if slot.slots() != constant.slots() {
            return Err(ClassFormatError::ConstantTypeMismatch {
                index,
                expected: "entry of the same width",
            });
        }
        let previous = std::mem::replace(slot, constant.clone());
        if self.interned.get(&previous) == Some(&index) {
            self.interned.remove(&previous);
        }
        self.interned.entry(constant).or_insert(index);
        Ok(())
    }

    fn push(&mut self, constant: Constant) -> Result<u16, ClassFormatError> {
        let slots = constant.slots();
        if self.entries.len() + slots > u16::MAX as usize {
            return Err(ClassFormatError::ConstantPoolOverflow);
        }
        let index = self.entries.len() as u16;
        self.entries.push(constant);
        if slots == 2 {
            self.entries.push(Constant::Unusable);
        }
        Ok(index)
    }

    pub(crate) fn read(reader: &mut ByteReader<'_>) -> Result<Self, ClassFormatError> {
        let count = reader.u2()?;
        if count == 0 {
            return Err(ClassFormatError::InvalidConstantIndex(0));
        }
        let mut pool = Self::new();
        pool.entries.reserve(count as usize);

        while pool.entries.len() < count as usize {
            let index = pool.entries.len() as u16;
            let constant = match reader.u1()? {
                1 => {
                    let len = reader.u2()? as usize;
                    Constant::Utf8(JavaUtf8::from_bytes(reader.slice(len)?.to_vec()))
                }
                3 => Constant::Integer(reader.u4()? as i32),
                4 => Constant::Float(reader.u4()?),
                5 => Constant::Long(reader.u8()? as i64),
                6 => Constant::Double(reader.u8()?),
                7 => Constant::Class {
                    name_index: reader.u2()?,
                },
                8 => Constant::String {
                    string_index: reader.u2()?,
                },
                9 => Constant::FieldRef {
                    class_index: reader.u2()?,
                    name_and_type_index: reader.u2()?,
                },
                10 => Constant::MethodRef {
                    class_index: reader.u2()?,
                    name_and_type_index: reader.u2()?,
                },
                11 => Constant::InterfaceMethodRef {
                    class_index: reader.u2()?,
                    name_and_type_index: reader.u2()?,
                },
                12 => Constant::NameAndType {
                    name_index: reader.u2()?,
                    descriptor_index: reader.u2()?,
                },
                15 => Constant::MethodHandle {
                    reference_kind: reader.u1()?,
                    reference_index: reader.u2()?,
                },
                16 => Constant::MethodType {
                    descriptor_index: reader.u2()?,
                },
                17 => Constant::Dynamic {
                    bootstrap_method_attr_index: reader.u2()?,
                    name_and_type_index: reader.u2()?,
                },
                18 => Constant::InvokeDynamic {
                    bootstrap_method_attr_index: reader.u2()?,
                    name_and_type_index: reader.u2()?,
                },
                19 => Constant::Module {
                    name_index: reader.u2()?,
                },
                20 => Constant::Package {
                    name_index: reader.u2()?,
                },
                tag => return Err(ClassFormatError::InvalidConstantTag { index, tag }),
            };
            if pool.entries.len() + constant.slots() > count as usize {
                // a trailing Long/Double would claim a slot past the count
                return Err(ClassFormatError::InvalidConstantIndex(index));
            }
            pool.interned.entry(constant.clone()).or_insert(index);
            pool.push(constant)?;
        }

        Ok(pool)
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<(), ClassFormatError> {
        write_u2(out, self.entries.len() as u16);
        for constant in &self.entries {
            match constant {
                Constant::Unusable => {}
                Constant::Utf8(utf8) => {
                    write_u1(out, 1);
                    write_count(out, utf8.bytes.len(), "Utf8 constant")?;
                    out.extend_from_slice(&utf8.bytes);
                }
                Constant::Integer(value) => {
                    write_u1(out, 3);
                    write_u4(out, *value as u32);
                }
                Constant::Float(bits) => {
                    write_u1(out, 4);
                    write_u4(out, *bits);
                }
                Constant::Long(value) => {
                    write_u1(out, 5);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                Constant::Double(bits) => {
                    write_u1(out, 6);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                Constant::Class { name_index } => {
                    write_u1(out, 7);
                    write_u2(out, *name_index);
                }
                Constant::String { string_index } => {
                    write_u1(out, 8);
                    write_u2(out, *string_index);
                }
                Constant::FieldRef {
                    class_index,
                    name_and_type_index,
                } => write_pair(out, 9, *class_index, *name_and_type_index),
                Constant::MethodRef {
                    class_index,
                    name_and_type_index,
                } => write_pair(out, 10, *class_index, *name_and_type_index),
                Constant::InterfaceMethodRef {
                    class_index,
                    name_and_type_index,
                } => write_pair(out, 11, *class_index, *name_and_type_index),
                Constant::NameAndType {
                    name_index,
                    descriptor_index,
                } => write_pair(out, 12, *name_index, *descriptor_index),
                Constant::MethodHandle {
                    reference_kind,
                    reference_index,
                } => {
                    write_u1(out, 15);
                    write_u1(out, *reference_kind);
                    write_u2(out, *reference_index);
                }
                Constant::MethodType { descriptor_index } => {
                    write_u1(out, 16);
                    write_u2(out, *descriptor_index);
                }
                Constant::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => write_pair(out, 17, *bootstrap_method_attr_index, *name_and_type_index),
                Constant::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => write_pair(out, 18, *bootstrap_method_attr_index, *name_and_type_index),
                Constant::Module { name_index } => {
                    write_u1(out, 19);
                    write_u2(out, *name_index);
                }
                Constant::Package { name_index } => {
                    write_u1(out, 20);
                    write_u2(out, *name_index);
                }
            }
        }
        Ok(())
    }
}

fn write_pair(out: &mut Vec<u8>, tag: u8, first: u16, second: u16) {
    write_u1(out, tag);
    write_u2(out, first);
    write_u2(out, second);
}

/// Decodes modified UTF-8 (two-byte NUL, surrogate pairs as two 3-byte
/// sequences). Returns `None` for invalid input.
fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    if bytes.iter().all(|b| (1..0x80).contains(b)) {
        return String::from_utf8(bytes.to_vec()).ok();
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte != 0 && byte & 0x80 == 0 {
            units.push(byte as u16);
            i += 1;
        } else if byte & 0xE0 == 0xC0 {
            let byte2 = *bytes.get(i + 1)?;
            if byte2 & 0xC0 != 0x80 {
                return None;
            }
            units.push(((byte & 0x1F) as u16) << 6 | (byte2 & 0x3F) as u16);
            i += 2;
        } else if byte & 0xF0 == 0xE0 {
            let byte2 = *bytes.get(i + 1)?;
            let byte3 = *bytes.get(i + 2)?;
            if byte2 & 0xC0 != 0x80 || byte3 & 0xC0 != 0x80 {
                return None;
            }
            units.push(
                ((byte & 0x0F) as u16) << 12 | ((byte2 & 0x3F) as u16) << 6 | (byte3 & 0x3F) as u16,
            );
            i += 3;
        } else {
            return None;
        }
    }

    String::from_utf16(&units).ok()
}

fn encode_modified_utf8(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}
