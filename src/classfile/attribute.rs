//! Attributes that carry symbolic references.
//!
//! Only attributes whose contents name classes, members, descriptors or
//! signatures are decoded; everything else is kept as raw bytes. Entries that
//! reference the constant pool purely through `CONSTANT_Class` (exception
//! handlers, `StackMapTable`, `NestMembers`, ...) are covered by the constant
//! pool and stay raw as well.

use super::bytes::{write_count, write_u1, write_u2, write_u4, ByteReader};
use super::pool::ConstantPool;
use super::ClassFormatError;

/// An attribute with the index of its name in the constant pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    /// Index of the `Utf8` attribute name.
    pub name_index: u16,
    /// Decoded contents.
    pub body: AttributeBody,
}

/// Decoded attribute contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeBody {
    /// `Code`, with its nested attributes.
    Code(Code),
    /// `Signature`
    Signature {
        /// Index of the `Utf8` signature.
        signature_index: u16,
    },
    /// `LocalVariableTable`; `descriptor_index` holds a field descriptor.
    LocalVariableTable(Vec<LocalVariable>),
    /// `LocalVariableTypeTable`; `descriptor_index` holds a signature.
    LocalVariableTypeTable(Vec<LocalVariable>),
    /// `InnerClasses`
    InnerClasses(Vec<InnerClass>),
    /// `EnclosingMethod`
    EnclosingMethod {
        /// The enclosing `Class`.
        class_index: u16,
        /// The enclosing method's `NameAndType`, or 0.
        method_index: u16,
    },
    /// `BootstrapMethods`
    BootstrapMethods(Vec<BootstrapMethod>),
    /// `RuntimeVisibleAnnotations` / `RuntimeInvisibleAnnotations`
    Annotations(Vec<Annotation>),
    /// `RuntimeVisibleParameterAnnotations` / `RuntimeInvisibleParameterAnnotations`
    ParameterAnnotations(Vec<Vec<Annotation>>),
    /// `RuntimeVisibleTypeAnnotations` / `RuntimeInvisibleTypeAnnotations`
    TypeAnnotations(Vec<TypeAnnotation>),
    /// `AnnotationDefault`
    AnnotationDefault(ElementValue),
    /// `Record`
    Record(Vec<RecordComponent>),
    /// Any other attribute, verbatim.
    Raw(Vec<u8>),
}

/// The `Code` attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Code {
    /// Operand stack depth.
    pub max_stack: u16,
    /// Local variable slots.
    pub max_locals: u16,
    /// The bytecode, never modified by remapping.
    pub code: Vec<u8>,
    /// Raw exception table entries (`start_pc`, `end_pc`, `handler_pc`, `catch_type`).
    pub exception_table: Vec<[u16; 4]>,
    /// Nested attributes (`LineNumberTable`, `LocalVariableTable`, ...).
    pub attributes: Vec<Attribute>,
}

/// An entry of `LocalVariableTable` or `LocalVariableTypeTable`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

/// An entry of `InnerClasses`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct InnerClass {
    pub inner_class_info_index: u16,
    pub outer_class_info_index: u16,
    /// Index of the simple name, 0 for anonymous classes.
    pub inner_name_index: u16,
    pub access_flags: u16,
}

/// An entry of `BootstrapMethods`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootstrapMethod {
    /// The `MethodHandle` of the bootstrap method.
    pub method_ref: u16,
    /// Static arguments.
    pub arguments: Vec<u16>,
}

/// A single annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    /// `Utf8` field descriptor of the annotation type.
    pub type_index: u16,
    /// Element name/value pairs.
    pub elements: Vec<(u16, ElementValue)>,
}

/// An annotation element value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElementValue {
    /// Primitive or string constant, keyed by its tag character.
    Const {
        /// One of `BCDFIJSZs`.
        tag: u8,
        /// The constant value entry.
        const_value_index: u16,
    },
    /// Enum constant.
    Enum {
        /// `Utf8` field descriptor of the enum type.
        type_name_index: u16,
        /// `Utf8` simple name of the constant.
        const_name_index: u16,
    },
    /// Class literal; `Utf8` return descriptor.
    Class(u16),
    /// Nested annotation.
    Annotation(Annotation),
    /// Array of values.
    Array(Vec<ElementValue>),
}

/// A type annotation.
///
/// `target_info` and `type_path` are kept raw since they never reference
/// the constant pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeAnnotation {
    /// The `target_type` byte.
    pub target_type: u8,
    /// Encoded `target_info`.
    pub target_info: Vec<u8>,
    /// Encoded `type_path`, including its length byte.
    pub type_path: Vec<u8>,
    /// The annotation itself.
    pub annotation: Annotation,
}

/// A component of the `Record` attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct RecordComponent {
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

pub(crate) fn read_attributes(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<Attribute>, ClassFormatError> {
    reader.list(|reader| {
        let name_index = reader.u2()?;
        let len = reader.u4()? as usize;
        let info = reader.slice(len)?;
        let name = pool.utf8_at(name_index)?;
        let body = read_body(name, info, pool).map_err(|err| match err {
            ClassFormatError::UnexpectedEof => ClassFormatError::InvalidAttribute {
                name: name.to_owned(),
                reason: "truncated attribute body",
            },
            _ => err,
        })?;
        Ok(Attribute { name_index, body })
    })
}

fn read_body(
    name: &str,
    info: &[u8],
    pool: &ConstantPool,
) -> Result<AttributeBody, ClassFormatError> {
    let mut reader = ByteReader::new(info);
    let reader = &mut reader;
    let body = match name {
        "Code" => {
            let max_stack = reader.u2()?;
            let max_locals = reader.u2()?;
            let code_len = reader.u4()? as usize;
            let code = reader.slice(code_len)?.to_vec();
            let exception_table =
                reader.list(|r| Ok([r.u2()?, r.u2()?, r.u2()?, r.u2()?]))?;
            let attributes = read_attributes(reader, pool)?;
            AttributeBody::Code(Code {
                max_stack,
                max_locals,
                code,
                exception_table,
                attributes,
            })
        }
        "Signature" => AttributeBody::Signature {
            signature_index: reader.u2()?,
        },
        "LocalVariableTable" => AttributeBody::LocalVariableTable(reader.list(read_local)?),
        "LocalVariableTypeTable" => AttributeBody::LocalVariableTypeTable(reader.list(read_local)?),
        "InnerClasses" => AttributeBody::InnerClasses(reader.list(|r| {
            Ok(InnerClass {
                inner_class_info_index: r.u2()?,
                outer_class_info_index: r.u2()?,
                inner_name_index: r.u2()?,
                access_flags: r.u2()?,
            })
        })?),
        "EnclosingMethod" => AttributeBody::EnclosingMethod {
            class_index: reader.u2()?,
            method_index: reader.u2()?,
        },
        "BootstrapMethods" => AttributeBody::BootstrapMethods(reader.list(|r| {
            Ok(BootstrapMethod {
                method_ref: r.u2()?,
                arguments: r.list(|r| r.u2())?,
            })
        })?),
        "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
            AttributeBody::Annotations(reader.list(read_annotation)?)
        }
        "RuntimeVisibleParameterAnnotations" | "RuntimeInvisibleParameterAnnotations" => {
            let count = reader.u1()?;
            let mut parameters = Vec::with_capacity(count as usize);
            for _ in 0..count {
                parameters.push(reader.list(read_annotation)?);
            }
            AttributeBody::ParameterAnnotations(parameters)
        }
        "RuntimeVisibleTypeAnnotations" | "RuntimeInvisibleTypeAnnotations" => {
            AttributeBody::TypeAnnotations(reader.list(read_type_annotation)?)
        }
        "AnnotationDefault" => AttributeBody::AnnotationDefault(read_element_value(reader)?),
        "Record" => AttributeBody::Record(reader.list(|r| {
            Ok(RecordComponent {
                name_index: r.u2()?,
                descriptor_index: r.u2()?,
                attributes: read_attributes(r, pool)?,
            })
        })?),
        _ => return Ok(AttributeBody::Raw(info.to_vec())),
    };

    if !reader.is_empty() {
        return Err(ClassFormatError::InvalidAttribute {
            name: name.to_owned(),
            reason: "trailing bytes in attribute body",
        });
    }
    Ok(body)
}

fn read_local(reader: &mut ByteReader<'_>) -> Result<LocalVariable, ClassFormatError> {
    Ok(LocalVariable {
        start_pc: reader.u2()?,
        length: reader.u2()?,
        name_index: reader.u2()?,
        descriptor_index: reader.u2()?,
        index: reader.u2()?,
    })
}

fn read_annotation(reader: &mut ByteReader<'_>) -> Result<Annotation, ClassFormatError> {
    Ok(Annotation {
        type_index: reader.u2()?,
        elements: reader.list(|r| Ok((r.u2()?, read_element_value(r)?)))?,
    })
}

fn read_element_value(reader: &mut ByteReader<'_>) -> Result<ElementValue, ClassFormatError> {
    Ok(match reader.u1()? {
        tag @ (b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's') => {
            ElementValue::Const {
                tag,
                const_value_index: reader.u2()?,
            }
        }
        b'e' => ElementValue::Enum {
            type_name_index: reader.u2()?,
            const_name_index: reader.u2()?,
        },
        b'c' => ElementValue::Class(reader.u2()?),
        b'@' => ElementValue::Annotation(read_annotation(reader)?),
        b'[' => ElementValue::Array(reader.list(read_element_value)?),
        _ => {
            return Err(ClassFormatError::InvalidAttribute {
                name: "annotation".to_owned(),
                reason: "unknown element value tag",
            })
        }
    })
}

fn read_type_annotation(reader: &mut ByteReader<'_>) -> Result<TypeAnnotation, ClassFormatError> {
    let target_type = reader.u1()?;
    let target_len = match target_type {
        0x00 | 0x01 | 0x16 => 1,
        0x10 | 0x11 | 0x12 | 0x17 | 0x42 | 0x43..=0x46 => 2,
        0x13..=0x15 => 0,
        0x47..=0x4B => 3,
        0x40 | 0x41 => {
            // localvar_target: table_length entries of (start_pc, length, index)
            let mut peek = ByteReader::new(reader.peek_rest());
            2 + 6 * peek.u2()? as usize
        }
        _ => {
            return Err(ClassFormatError::InvalidAttribute {
                name: "type annotation".to_owned(),
                reason: "unknown target type",
            })
        }
    };
    let target_info = reader.slice(target_len)?.to_vec();
    let path_len = reader.u1()? as usize;
    let mut type_path = Vec::with_capacity(1 + 2 * path_len);
    type_path.push(path_len as u8);
    type_path.extend_from_slice(reader.slice(2 * path_len)?);
    Ok(TypeAnnotation {
        target_type,
        target_info,
        type_path,
        annotation: read_annotation(reader)?,
    })
}

pub(crate) fn write_attributes(
    out: &mut Vec<u8>,
    attributes: &[Attribute],
) -> Result<(), ClassFormatError> {
    write_count(out, attributes.len(), "attribute count")?;
    for attribute in attributes {
        write_u2(out, attribute.name_index);
        let mut body = Vec::new();
        write_body(&mut body, &attribute.body)?;
        let len = u32::try_from(body.len()).map_err(|_| ClassFormatError::TooLarge("attribute"))?;
        write_u4(out, len);
        out.extend_from_slice(&body);
    }
    Ok(())
}

fn write_body(out: &mut Vec<u8>, body: &AttributeBody) -> Result<(), ClassFormatError> {
    match body {
        AttributeBody::Code(code) => {
            write_u2(out, code.max_stack);
            write_u2(out, code.max_locals);
            let len = u32::try_from(code.code.len())
                .map_err(|_| ClassFormatError::TooLarge("code"))?;
            write_u4(out, len);
            out.extend_from_slice(&code.code);
            write_count(out, code.exception_table.len(), "exception table")?;
            for entry in &code.exception_table {
                for value in entry {
                    write_u2(out, *value);
                }
            }
            write_attributes(out, &code.attributes)?;
        }
        AttributeBody::Signature { signature_index } => write_u2(out, *signature_index),
        AttributeBody::LocalVariableTable(locals)
        | AttributeBody::LocalVariableTypeTable(locals) => {
            write_count(out, locals.len(), "local variable table")?;
            for local in locals {
                write_u2(out, local.start_pc);
                write_u2(out, local.length);
                write_u2(out, local.name_index);
                write_u2(out, local.descriptor_index);
                write_u2(out, local.index);
            }
        }
        AttributeBody::InnerClasses(classes) => {
            write_count(out, classes.len(), "inner classes")?;
            for class in classes {
                write_u2(out, class.inner_class_info_index);
                write_u2(out, class.outer_class_info_index);
                write_u2(out, class.inner_name_index);
                write_u2(out, class.access_flags);
            }
        }
        AttributeBody::EnclosingMethod {
            class_index,
            method_index,
        } => {
            write_u2(out, *class_index);
            write_u2(out, *method_index);
        }
        AttributeBody::BootstrapMethods(methods) => {
            write_count(out, methods.len(), "bootstrap methods")?;
            for method in methods {
                write_u2(out, method.method_ref);
                write_count(out, method.arguments.len(), "bootstrap arguments")?;
                for argument in &method.arguments {
                    write_u2(out, *argument);
                }
            }
        }
        AttributeBody::Annotations(annotations) => write_annotations(out, annotations)?,
        AttributeBody::ParameterAnnotations(parameters) => {
            let count = u8::try_from(parameters.len())
                .map_err(|_| ClassFormatError::TooLarge("parameter annotations"))?;
            write_u1(out, count);
            for annotations in parameters {
                write_annotations(out, annotations)?;
            }
        }
        AttributeBody::TypeAnnotations(annotations) => {
            write_count(out, annotations.len(), "type annotations")?;
            for annotation in annotations {
                write_u1(out, annotation.target_type);
                out.extend_from_slice(&annotation.target_info);
                out.extend_from_slice(&annotation.type_path);
                write_annotation(out, &annotation.annotation)?;
            }
        }
        AttributeBody::AnnotationDefault(value) => write_element_value(out, value)?,
        AttributeBody::Record(components) => {
            write_count(out, components.len(), "record components")?;
            for component in components {
                write_u2(out, component.name_index);
                write_u2(out, component.descriptor_index);
                write_attributes(out, &component.attributes)?;
            }
        }
        AttributeBody::Raw(info) => out.extend_from_slice(info),
    }
    Ok(())
}

fn write_annotations(
    out: &mut Vec<u8>,
    annotations: &[Annotation],
) -> Result<(), ClassFormatError> {
    write_count(out, annotations.len(), "annotations")?;
    for annotation in annotations {
        write_annotation(out, annotation)?;
    }
    Ok(())
}

fn write_annotation(out: &mut Vec<u8>, annotation: &Annotation) -> Result<(), ClassFormatError> {
    write_u2(out, annotation.type_index);
    write_count(out, annotation.elements.len(), "annotation elements")?;
    for (name_index, value) in &annotation.elements {
        write_u2(out, *name_index);
        write_element_value(out, value)?;
    }
    Ok(())
}

fn write_element_value(out: &mut Vec<u8>, value: &ElementValue) -> Result<(), ClassFormatError> {
    match value {
        ElementValue::Const {
            tag,
            const_value_index,
        } => {
            write_u1(out, *tag);
            write_u2(out, *const_value_index);
        }
        ElementValue::Enum {
            type_name_index,
            const_name_index,
        } => {
            write_u1(out, b'e');
            write_u2(out, *type_name_index);
            write_u2(out, *const_name_index);
        }
        ElementValue::Class(index) => {
            write_u1(out, b'c');
            write_u2(out, *index);
        }
        ElementValue::Annotation(annotation) => {
            write_u1(out, b'@');
            write_annotation(out, annotation)?;
        }
        ElementValue::Array(values) => {
            write_u1(out, b'[');
            write_count(out, values.len(), "element values")?;
            for value in values {
                write_element_value(out, value)?;
            }
        }
    }
    Ok(())
}
