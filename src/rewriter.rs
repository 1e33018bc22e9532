//! Rewrites the symbolic references of a single class.
//!
//! Bytecode is never touched. Renaming works on the constant pool: `Class`
//! entries are pointed at new names in place, member references and
//! `invokedynamic` sites get new `NameAndType` entries, and attributes are
//! pointed at new `Utf8` entries. New entries are appended and shared, so
//! every code offset and every pool index used by instructions stays valid.

use std::borrow::Cow;

use tracing::{debug, warn};

use crate::classfile::{
    Annotation, Attribute, AttributeBody, BootstrapMethod, ClassFile, ClassFormatError, Constant,
    ConstantPool, ElementValue, InnerClass, Member, RefKind,
};
use crate::descriptor::{remapped_simple_name, DescriptorError, MethodDescriptor};
use crate::mapping::MemberKind;
use crate::resolver::{ResolvedMapping, SymbolResolver};

const LAMBDA_METAFACTORY: &str = "java/lang/invoke/LambdaMetafactory";

/// The result of rewriting one class.
#[derive(Clone, Debug)]
pub struct RewrittenClass {
    /// The rewritten class.
    pub class: ClassFile,
    /// Internal name before rewriting.
    pub old_name: String,
    /// Internal name after rewriting.
    pub new_name: String,
    /// References left unchanged because their descriptor was malformed.
    pub issues: Vec<DescriptorError>,
}

/// Rewrites classes using a shared [`SymbolResolver`].
pub struct ClassRewriter<'r, 'a> {
    resolver: &'r SymbolResolver<'a>,
}

impl<'r, 'a> ClassRewriter<'r, 'a> {
    /// Creates a rewriter.
    pub fn new(resolver: &'r SymbolResolver<'a>) -> Self {
        Self { resolver }
    }

    /// Rewrites all references in `class`.
    ///
    /// Fails only if the class structure is inconsistent or the constant pool
    /// would overflow.
    pub fn rewrite(&self, class: &ClassFile) -> Result<RewrittenClass, ClassFormatError> {
        let old_name = class.name()?.to_owned();
        if class.is_module() {
            return Ok(RewrittenClass {
                class: class.clone(),
                new_name: old_name.clone(),
                old_name,
                issues: Vec::new(),
            });
        }

        let mut rewrite = Rewrite {
            resolver: self.resolver,
            original: &class.pool,
            pool: class.pool.clone(),
            owner: &old_name,
            bootstrap: class.bootstrap_methods(),
            issues: Vec::new(),
        };

        rewrite.rewrite_pool()?;
        let fields = class
            .fields
            .iter()
            .map(|field| rewrite.rewrite_member(field, MemberKind::Field))
            .collect::<Result<Vec<_>, _>>()?;
        let methods = class
            .methods
            .iter()
            .map(|method| rewrite.rewrite_member(method, MemberKind::Method))
            .collect::<Result<Vec<_>, _>>()?;
        let mut attributes = class.attributes.clone();
        rewrite.rewrite_attributes(&mut attributes)?;

        let Rewrite { pool, issues, .. } = rewrite;
        let appended = pool.len() - class.pool.len();
        let rewritten = ClassFile {
            minor_version: class.minor_version,
            major_version: class.major_version,
            pool,
            access_flags: class.access_flags,
            this_class: class.this_class,
            super_class: class.super_class,
            interfaces: class.interfaces.clone(),
            fields,
            methods,
            attributes,
        };
        let new_name = rewritten.name()?.to_owned();
        debug!(class = %old_name, new_name = %new_name, appended, "rewrote class");

        Ok(RewrittenClass {
            class: rewritten,
            old_name,
            new_name,
            issues,
        })
    }
}

#[derive(Clone, Copy)]
enum TextKind {
    Descriptor,
    Signature,
}

struct Rewrite<'c, 'r, 'a> {
    resolver: &'r SymbolResolver<'a>,
    /// Pool of the input class; all reads go here.
    original: &'c ConstantPool,
    /// Pool of the output class; all writes go here.
    pool: ConstantPool,
    owner: &'c str,
    bootstrap: &'c [BootstrapMethod],
    issues: Vec<DescriptorError>,
}

impl<'c> Rewrite<'c, '_, '_> {
    fn report(&mut self, error: DescriptorError) {
        warn!(
            class = self.owner,
            descriptor = error.descriptor(),
            reason = error.reason(),
            "leaving malformed descriptor unchanged"
        );
        self.issues.push(error);
    }

    fn remap_text<'t>(&mut self, text: &'t str, kind: TextKind) -> Cow<'t, str> {
        let remapped = match kind {
            TextKind::Descriptor => self.resolver.remap_descriptor(text),
            TextKind::Signature => self.resolver.remap_signature(text),
        };
        match remapped {
            Ok(remapped) => remapped,
            Err(error) => {
                self.report(error);
                Cow::Borrowed(text)
            }
        }
    }

    /// Returns the index of the `Utf8` holding the remapped text of `index`.
    fn remap_utf8(&mut self, index: u16, kind: TextKind) -> Result<u16, ClassFormatError> {
        let original = self.original;
        match self.remap_text(original.utf8_at(index)?, kind) {
            Cow::Borrowed(_) => Ok(index),
            Cow::Owned(remapped) => self.pool.utf8(&remapped),
        }
    }

    fn resolve(
        &mut self,
        kind: MemberKind,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Option<ResolvedMapping> {
        let resolved = match kind {
            MemberKind::Field => self.resolver.resolve_field(owner, name, descriptor),
            MemberKind::Method => self.resolver.resolve_method(owner, name, descriptor),
        };
        match resolved {
            Ok(resolved) => Some(resolved),
            Err(error) => {
                self.report(error);
                None
            }
        }
    }

    /// A `NameAndType` for the new name and remapped descriptor, or `None`
    /// when both are unchanged.
    fn name_and_type(
        &mut self,
        name: &str,
        resolved: &ResolvedMapping,
        descriptor: &str,
    ) -> Result<Option<u16>, ClassFormatError> {
        let new_descriptor = self.remap_text(descriptor, TextKind::Descriptor);
        if resolved.new_name().is_none() && matches!(new_descriptor, Cow::Borrowed(_)) {
            return Ok(None);
        }
        self.pool
            .name_and_type(resolved.name_or(name), &new_descriptor)
            .map(Some)
    }

    fn rewrite_pool(&mut self) -> Result<(), ClassFormatError> {
        let original = self.original;
        for (index, constant) in original.iter() {
            match *constant {
                Constant::Class { name_index } => {
                    let name = original.utf8_at(name_index)?;
                    match self.resolver.remap_type(name) {
                        Ok(Cow::Owned(new_name)) => {
                            let name_index = self.pool.utf8(&new_name)?;
                            self.pool.replace(index, Constant::Class { name_index })?;
                        }
                        Ok(Cow::Borrowed(_)) => {}
                        Err(error) => self.report(error),
                    }
                }
                Constant::FieldRef { class_index, .. }
                | Constant::MethodRef { class_index, .. }
                | Constant::InterfaceMethodRef { class_index, .. } => {
                    let member = original.member_ref_at(index)?;
                    let kind = match member.kind {
                        RefKind::Field => MemberKind::Field,
                        RefKind::Method | RefKind::InterfaceMethod => MemberKind::Method,
                    };
                    let resolved =
                        self.resolve(kind, member.owner, member.name, member.descriptor);
                    let Some(resolved) = resolved else {
                        continue;
                    };
                    let Some(name_and_type_index) =
                        self.name_and_type(member.name, &resolved, member.descriptor)?
                    else {
                        continue;
                    };
                    let replacement = match member.kind {
                        RefKind::Field => Constant::FieldRef {
                            class_index,
                            name_and_type_index,
                        },
                        RefKind::Method => Constant::MethodRef {
                            class_index,
                            name_and_type_index,
                        },
                        RefKind::InterfaceMethod => Constant::InterfaceMethodRef {
                            class_index,
                            name_and_type_index,
                        },
                    };
                    self.pool.replace(index, replacement)?;
                }
                Constant::MethodType { descriptor_index } => {
                    let remapped = self.remap_utf8(descriptor_index, TextKind::Descriptor)?;
                    if remapped != descriptor_index {
                        self.pool.replace(
                            index,
                            Constant::MethodType {
                                descriptor_index: remapped,
                            },
                        )?;
                    }
                }
                Constant::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    let (name, descriptor) = original.name_and_type_at(name_and_type_index)?;
                    let resolved = self.lambda_name(bootstrap_method_attr_index, name, descriptor);
                    let name_and_type = self.name_and_type(name, &resolved, descriptor)?;
                    if let Some(name_and_type_index) = name_and_type {
                        self.pool.replace(
                            index,
                            Constant::InvokeDynamic {
                                bootstrap_method_attr_index,
                                name_and_type_index,
                            },
                        )?;
                    }
                }
                Constant::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    let (name, descriptor) = original.name_and_type_at(name_and_type_index)?;
                    if let Some(name_and_type_index) =
                        self.name_and_type(name, &ResolvedMapping::Unchanged, descriptor)?
                    {
                        self.pool.replace(
                            index,
                            Constant::Dynamic {
                                bootstrap_method_attr_index,
                                name_and_type_index,
                            },
                        )?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Resolves the interface method implemented by a lambda or method
    /// reference call site.
    fn lambda_name(
        &mut self,
        bootstrap_index: u16,
        name: &str,
        descriptor: &'c str,
    ) -> ResolvedMapping {
        let Some((interface, sam_descriptor)) = self.lambda_target(bootstrap_index, descriptor)
        else {
            return ResolvedMapping::Unchanged;
        };
        self.resolve(MemberKind::Method, interface, name, sam_descriptor)
            .unwrap_or(ResolvedMapping::Unchanged)
    }

    /// The functional interface and the erased descriptor of its method.
    fn lambda_target(
        &self,
        bootstrap_index: u16,
        descriptor: &'c str,
    ) -> Option<(&'c str, &'c str)> {
        let original = self.original;
        let bootstrap = self.bootstrap.get(bootstrap_index as usize)?;
        let Ok(Constant::MethodHandle {
            reference_index, ..
        }) = original.get(bootstrap.method_ref)
        else {
            return None;
        };
        let handle = original.member_ref_at(*reference_index).ok()?;
        if handle.owner != LAMBDA_METAFACTORY
            || !matches!(handle.name, "metafactory" | "altMetafactory")
        {
            return None;
        }
        let sam_type = original.get(*bootstrap.arguments.first()?);
        let Ok(Constant::MethodType { descriptor_index }) = sam_type else {
            return None;
        };
        let sam_descriptor = original.utf8_at(*descriptor_index).ok()?;
        let interface = MethodDescriptor::parse(descriptor).ok()?.return_class()?;
        Some((interface, sam_descriptor))
    }

    fn rewrite_member(
        &mut self,
        member: &Member,
        kind: MemberKind,
    ) -> Result<Member, ClassFormatError> {
        let original = self.original;
        let name = member.name(original)?;
        let descriptor = member.descriptor(original)?;
        let owner = self.owner;

        let (name_index, descriptor_index) = match self.resolve(kind, owner, name, descriptor) {
            Some(resolved) => {
                let name_index = match resolved.new_name() {
                    Some(new_name) => self.pool.utf8(new_name)?,
                    None => member.name_index,
                };
                (
                    name_index,
                    self.remap_utf8(member.descriptor_index, TextKind::Descriptor)?,
                )
            }
            None => (member.name_index, member.descriptor_index),
        };

        let mut attributes = member.attributes.clone();
        self.rewrite_attributes(&mut attributes)?;
        Ok(Member {
            access_flags: member.access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }

    fn rewrite_attributes(&mut self, attributes: &mut [Attribute]) -> Result<(), ClassFormatError> {
        for attribute in attributes {
            self.rewrite_attribute(&mut attribute.body)?;
        }
        Ok(())
    }

    fn rewrite_attribute(&mut self, body: &mut AttributeBody) -> Result<(), ClassFormatError> {
        match body {
            AttributeBody::Code(code) => self.rewrite_attributes(&mut code.attributes)?,
            AttributeBody::Signature { signature_index } => {
                *signature_index = self.remap_utf8(*signature_index, TextKind::Signature)?;
            }
            AttributeBody::LocalVariableTable(locals) => {
                for local in locals {
                    local.descriptor_index =
                        self.remap_utf8(local.descriptor_index, TextKind::Descriptor)?;
                }
            }
            AttributeBody::LocalVariableTypeTable(locals) => {
                for local in locals {
                    local.descriptor_index =
                        self.remap_utf8(local.descriptor_index, TextKind::Signature)?;
                }
            }
            AttributeBody::InnerClasses(classes) => {
                for class in classes {
                    self.rewrite_inner_class(class)?;
                }
            }
            AttributeBody::EnclosingMethod {
                class_index,
                method_index,
            } => {
                if *method_index != 0 {
                    *method_index = self.rewrite_enclosing_method(*class_index, *method_index)?;
                }
            }
            AttributeBody::Annotations(annotations) => {
                for annotation in annotations {
                    self.rewrite_annotation(annotation)?;
                }
            }
            AttributeBody::ParameterAnnotations(parameters) => {
                for annotation in parameters.iter_mut().flatten() {
                    self.rewrite_annotation(annotation)?;
                }
            }
            AttributeBody::TypeAnnotations(annotations) => {
                for annotation in annotations {
                    self.rewrite_annotation(&mut annotation.annotation)?;
                }
            }
            AttributeBody::AnnotationDefault(value) => self.rewrite_element_value(value)?,
            AttributeBody::Record(components) => {
                let original = self.original;
                let owner = self.owner;
                for component in components {
                    let name = original.utf8_at(component.name_index)?;
                    let descriptor = original.utf8_at(component.descriptor_index)?;
                    if let Some(ResolvedMapping::Renamed(new_name)) =
                        self.resolve(MemberKind::Field, owner, name, descriptor)
                    {
                        component.name_index = self.pool.utf8(&new_name)?;
                    }
                    component.descriptor_index =
                        self.remap_utf8(component.descriptor_index, TextKind::Descriptor)?;
                    self.rewrite_attributes(&mut component.attributes)?;
                }
            }
            // bootstrap methods only point at pool entries rewritten in place
            AttributeBody::BootstrapMethods(_) | AttributeBody::Raw(_) => {}
        }
        Ok(())
    }

    fn rewrite_inner_class(&mut self, inner: &mut InnerClass) -> Result<(), ClassFormatError> {
        if inner.inner_name_index == 0 || inner.inner_class_info_index == 0 {
            return Ok(());
        }
        let original = self.original;
        let old_binary = original.class_name_at(inner.inner_class_info_index)?;
        let new_binary = self.resolver.class_name(old_binary);
        let new_outer = match inner.outer_class_info_index {
            0 => None,
            index => Some(self.resolver.class_name(original.class_name_at(index)?)),
        };

        if let Some(simple) = remapped_simple_name(old_binary, &new_binary, new_outer.as_deref()) {
            if simple != original.utf8_at(inner.inner_name_index)? {
                inner.inner_name_index = self.pool.utf8(&simple)?;
            }
        }
        Ok(())
    }

    fn rewrite_enclosing_method(
        &mut self,
        class_index: u16,
        method_index: u16,
    ) -> Result<u16, ClassFormatError> {
        let original = self.original;
        let owner = original.class_name_at(class_index)?;
        let (name, descriptor) = original.name_and_type_at(method_index)?;
        let Some(resolved) = self.resolve(MemberKind::Method, owner, name, descriptor) else {
            return Ok(method_index);
        };
        Ok(self
            .name_and_type(name, &resolved, descriptor)?
            .unwrap_or(method_index))
    }

    fn rewrite_annotation(&mut self, annotation: &mut Annotation) -> Result<(), ClassFormatError> {
        annotation.type_index = self.remap_utf8(annotation.type_index, TextKind::Descriptor)?;
        for (_, value) in &mut annotation.elements {
            self.rewrite_element_value(value)?;
        }
        Ok(())
    }

    fn rewrite_element_value(&mut self, value: &mut ElementValue) -> Result<(), ClassFormatError> {
        match value {
            ElementValue::Const { .. } => {}
            ElementValue::Enum {
                type_name_index, ..
            } => {
                *type_name_index = self.remap_utf8(*type_name_index, TextKind::Descriptor)?;
            }
            ElementValue::Class(index) => {
                // `void.class` is encoded as the return descriptor `V`
                if self.original.utf8_at(*index)? != "V" {
                    *index = self.remap_utf8(*index, TextKind::Descriptor)?;
                }
            }
            ElementValue::Annotation(annotation) => self.rewrite_annotation(annotation)?,
            ElementValue::Array(values) => {
                for value in values {
                    self.rewrite_element_value(value)?;
                }
            }
        }
        Ok(())
    }
}
