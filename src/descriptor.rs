//! Parsing and remapping of JVM type descriptors and generic signatures.
//!
//! Descriptors follow the grammar of the class file format: `I`, `[J`,
//! `Ljava/lang/String;` for fields and `(ILjava/lang/Object;)V` for methods.
//! Generic signatures extend this with type parameters, type arguments, type
//! variables and inner class suffixes.
//!
//! All remapping functions take a class-mapping callback returning the new
//! internal name of a class, or `None` when the class keeps its name. Only the
//! reference type components are ever rewritten.

use std::borrow::Cow;

use thiserror::Error;

/// Error for a descriptor or signature that does not follow the type grammar.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("malformed descriptor `{descriptor}`: {reason}")]
pub struct DescriptorError {
    descriptor: String,
    reason: &'static str,
}

impl DescriptorError {
    fn new(descriptor: &str, reason: &'static str) -> Self {
        Self {
            descriptor: descriptor.to_owned(),
            reason,
        }
    }

    /// The offending descriptor.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Why the descriptor was rejected.
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

/// The parameter and return type slices of a method descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor<'d> {
    /// One descriptor per parameter, in declaration order.
    pub parameters: Vec<&'d str>,
    /// The return type descriptor, `V` for void.
    pub return_type: &'d str,
}

impl<'d> MethodDescriptor<'d> {
    /// Parses a method descriptor such as `(I[Ljava/lang/String;)V`.
    ///
    /// # Examples
    ///
    /// ```
    /// use remapper::descriptor::MethodDescriptor;
    ///
    /// let parsed = MethodDescriptor::parse("(I[Ljava/lang/String;)J").unwrap();
    /// assert_eq!(parsed.parameters, vec!["I", "[Ljava/lang/String;"]);
    /// assert_eq!(parsed.return_type, "J");
    /// ```
    pub fn parse(descriptor: &'d str) -> Result<Self, DescriptorError> {
        let mut parser = Parser::new(descriptor);
        let mut sink = Sink::Discard;
        let mut map = |_: &str| None;

        parser.expect(b'(')?;
        let mut parameters = Vec::new();
        while !parser.eat(b')') {
            let start = parser.pos;
            parser.field_type(&mut sink, &mut map)?;
            parameters.push(&descriptor[start..parser.pos]);
        }
        let start = parser.pos;
        if !parser.eat(b'V') {
            parser.field_type(&mut sink, &mut map)?;
        }
        let return_type = &descriptor[start..parser.pos];
        parser.finish()?;

        Ok(Self {
            parameters,
            return_type,
        })
    }

    /// The internal name of the returned class, if the method returns an
    /// object type (arrays excluded).
    pub fn return_class(&self) -> Option<&'d str> {
        self.return_type
            .strip_prefix('L')
            .and_then(|rest| rest.strip_suffix(';'))
    }
}

/// Checks that `descriptor` is a single field type descriptor.
pub fn validate_field_descriptor(descriptor: &str) -> Result<(), DescriptorError> {
    let mut parser = Parser::new(descriptor);
    parser.field_type(&mut Sink::Discard, &mut |_: &str| None)?;
    parser.finish()
}

/// Checks that `descriptor` is a method descriptor.
pub fn validate_method_descriptor(descriptor: &str) -> Result<(), DescriptorError> {
    MethodDescriptor::parse(descriptor).map(|_| ())
}

/// Whether the descriptor belongs to a method (starts with `(`).
pub fn is_method_descriptor(descriptor: &str) -> bool {
    descriptor.starts_with('(')
}

/// Checks that `name` is a plausible internal class name (`java/lang/Object`).
pub fn is_valid_internal_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.ends_with('/')
        && !name.contains("//")
        && !name.contains(['.', ';', '[', '<', '>'])
}

/// Rewrites every class name inside a field or method descriptor.
///
/// # Examples
///
/// ```
/// use remapper::descriptor::remap_descriptor;
///
/// let remapped = remap_descriptor("(La;[[La;I)La;", |name| {
///     (name == "a").then(|| "com/example/Widget".to_string())
/// })
/// .unwrap();
/// assert_eq!(
///     remapped,
///     "(Lcom/example/Widget;[[Lcom/example/Widget;I)Lcom/example/Widget;"
/// );
/// ```
pub fn remap_descriptor<'d, F>(
    descriptor: &'d str,
    mut map: F,
) -> Result<Cow<'d, str>, DescriptorError>
where
    F: FnMut(&str) -> Option<String>,
{
    if !descriptor.contains('L') {
        // primitives and arrays of primitives never change
        return if is_method_descriptor(descriptor) {
            validate_method_descriptor(descriptor).map(|_| Cow::Borrowed(descriptor))
        } else {
            validate_field_descriptor(descriptor).map(|_| Cow::Borrowed(descriptor))
        };
    }

    let mut parser = Parser::new(descriptor);
    let mut sink = Sink::Write(String::with_capacity(descriptor.len() + 16));

    if parser.eat(b'(') {
        sink.push('(');
        while !parser.eat(b')') {
            parser.field_type(&mut sink, &mut map)?;
        }
        sink.push(')');
        if parser.eat(b'V') {
            sink.push('V');
        } else {
            parser.field_type(&mut sink, &mut map)?;
        }
    } else {
        parser.field_type(&mut sink, &mut map)?;
    }
    parser.finish()?;

    Ok(sink.into_cow(descriptor))
}

/// Rewrites the name stored in a `CONSTANT_Class` entry, which is either an
/// internal name or, for array classes, a field descriptor.
pub fn remap_type<'d, F>(name: &'d str, mut map: F) -> Result<Cow<'d, str>, DescriptorError>
where
    F: FnMut(&str) -> Option<String>,
{
    if name.starts_with('[') {
        return remap_descriptor(name, map);
    }
    if name.is_empty() || name.contains([';', '[']) {
        return Err(DescriptorError::new(name, "invalid internal class name"));
    }
    Ok(match map(name) {
        Some(mapped) if mapped != name => Cow::Owned(mapped),
        _ => Cow::Borrowed(name),
    })
}

/// Rewrites every class name inside a class, method or field generic
/// signature.
///
/// Inner class suffixes (`Lp/Outer<TT;>.Inner;`) are remapped through the
/// binary name `p/Outer$Inner`, keeping only the part of the new name that
/// follows the remapped outer class.
///
/// # Examples
///
/// ```
/// use remapper::descriptor::remap_signature;
///
/// let remapped = remap_signature("<T:La;>Ljava/lang/Object;Lb<TT;>;", |name| match name {
///     "a" => Some("p/Alpha".to_string()),
///     "b" => Some("p/Beta".to_string()),
///     _ => None,
/// })
/// .unwrap();
/// assert_eq!(remapped, "<T:Lp/Alpha;>Ljava/lang/Object;Lp/Beta<TT;>;");
/// ```
pub fn remap_signature<'s, F>(
    signature: &'s str,
    mut map: F,
) -> Result<Cow<'s, str>, DescriptorError>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut parser = Parser::new(signature);
    let mut sink = Sink::Write(String::with_capacity(signature.len() + 16));

    if parser.peek() == Some(b'<') {
        parser.type_parameters(&mut sink, &mut map)?;
    }

    if parser.eat(b'(') {
        sink.push('(');
        while !parser.eat(b')') {
            parser.type_signature(&mut sink, &mut map)?;
        }
        sink.push(')');
        if parser.eat(b'V') {
            sink.push('V');
        } else {
            parser.type_signature(&mut sink, &mut map)?;
        }
        while parser.eat(b'^') {
            sink.push('^');
            parser.reference_signature(&mut sink, &mut map)?;
        }
    } else {
        // field signature, or superclass followed by superinterfaces
        parser.type_signature(&mut sink, &mut map)?;
        while !parser.at_end() {
            parser.reference_signature(&mut sink, &mut map)?;
        }
    }
    parser.finish()?;

    Ok(sink.into_cow(signature))
}

/// Computes the simple name of a remapped nested class.
///
/// `old_binary` is the original binary name (`p/Outer$Inner`), `new_binary`
/// its remapped form and `new_outer` the remapped outer class name. Returns
/// `None` when the original simple name can be kept.
pub(crate) fn remapped_simple_name(
    old_binary: &str,
    new_binary: &str,
    new_outer: Option<&str>,
) -> Option<String> {
    if old_binary == new_binary {
        return None;
    }
    if let Some(outer) = new_outer {
        if let Some(rest) = new_binary
            .strip_prefix(outer)
            .and_then(|rest| rest.strip_prefix('$'))
        {
            return Some(rest.to_owned());
        }
    }
    let split = new_binary.rfind('$')?;
    let mut start = split + 1;
    // local classes carry a numeric prefix (`Outer$1Local`) that is not part
    // of their simple name
    while new_binary[start..].starts_with(|c: char| c.is_ascii_digit()) {
        start += 1;
    }
    let simple = &new_binary[start..];
    (!simple.is_empty()).then(|| simple.to_owned())
}

enum Sink {
    Discard,
    Write(String),
}

impl Sink {
    fn push(&mut self, c: char) {
        if let Sink::Write(out) = self {
            out.push(c);
        }
    }

    fn push_str(&mut self, s: &str) {
        if let Sink::Write(out) = self {
            out.push_str(s);
        }
    }

    fn into_cow(self, original: &str) -> Cow<'_, str> {
        match self {
            Sink::Write(out) if out != original => Cow::Owned(out),
            _ => Cow::Borrowed(original),
        }
    }
}

struct Parser<'s> {
    source: &'s str,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Self {
        Self { source, pos: 0 }
    }

    fn error(&self, reason: &'static str) -> DescriptorError {
        DescriptorError::new(self.source, reason)
    }

    fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), DescriptorError> {
        if self.eat(byte) {
            Ok(())
        } else if self.at_end() {
            Err(self.error("unexpected end of descriptor"))
        } else {
            Err(self.error("unexpected character"))
        }
    }

    fn finish(&self) -> Result<(), DescriptorError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("trailing characters"))
        }
    }

    /// Consumes bytes up to (not including) the first byte matching `stop`.
    fn take_until(&mut self, stop: impl Fn(u8) -> bool) -> Result<&'s str, DescriptorError> {
        let rest = &self.source.as_bytes()[self.pos..];
        let len = rest
            .iter()
            .position(|b| stop(*b))
            .ok_or_else(|| self.error("unterminated class name"))?;
        let slice = &self.source[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn field_type<F>(&mut self, sink: &mut Sink, map: &mut F) -> Result<(), DescriptorError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut dimensions = 0usize;
        while self.eat(b'[') {
            dimensions += 1;
            sink.push('[');
        }
        if dimensions > 255 {
            return Err(self.error("array type exceeds 255 dimensions"));
        }

        match self.peek() {
            Some(tag @ (b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z')) => {
                self.pos += 1;
                sink.push(tag as char);
                Ok(())
            }
            Some(b'L') => {
                self.pos += 1;
                let name = self.take_until(|b| b == b';')?;
                if name.is_empty() || name.contains(['.', '[', '<', '>']) {
                    return Err(self.error("invalid class name"));
                }
                self.pos += 1;
                sink.push('L');
                match map(name) {
                    Some(mapped) => sink.push_str(&mapped),
                    None => sink.push_str(name),
                }
                sink.push(';');
                Ok(())
            }
            Some(_) => Err(self.error("unexpected type tag")),
            None => Err(self.error("unexpected end of descriptor")),
        }
    }

    fn identifier(&mut self, stop: impl Fn(u8) -> bool) -> Result<&'s str, DescriptorError> {
        let ident = self.take_until(stop)?;
        if ident.is_empty() || ident.contains(['.', ';', '[', '/', '<', '>', ':']) {
            return Err(self.error("invalid identifier"));
        }
        Ok(ident)
    }

    fn type_parameters<F>(&mut self, sink: &mut Sink, map: &mut F) -> Result<(), DescriptorError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        self.expect(b'<')?;
        sink.push('<');
        loop {
            let name = self.identifier(|b| b == b':')?;
            sink.push_str(name);
            self.expect(b':')?;
            sink.push(':');
            // the class bound may be empty (`T::Ljava/lang/Comparable;`)
            if matches!(self.peek(), Some(b'L' | b'T' | b'[')) {
                self.reference_signature(sink, map)?;
            }
            while self.eat(b':') {
                sink.push(':');
                self.reference_signature(sink, map)?;
            }
            if self.eat(b'>') {
                sink.push('>');
                return Ok(());
            }
        }
    }

    fn type_signature<F>(&mut self, sink: &mut Sink, map: &mut F) -> Result<(), DescriptorError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        match self.peek() {
            Some(tag @ (b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z')) => {
                self.pos += 1;
                sink.push(tag as char);
                Ok(())
            }
            Some(_) => self.reference_signature(sink, map),
            None => Err(self.error("unexpected end of signature")),
        }
    }

    fn reference_signature<F>(
        &mut self,
        sink: &mut Sink,
        map: &mut F,
    ) -> Result<(), DescriptorError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        match self.peek() {
            Some(b'L') => {
                self.pos += 1;
                self.class_type_signature(sink, map)
            }
            Some(b'T') => {
                self.pos += 1;
                let name = self.identifier(|b| b == b';')?;
                self.pos += 1;
                sink.push('T');
                sink.push_str(name);
                sink.push(';');
                Ok(())
            }
            Some(b'[') => {
                self.pos += 1;
                sink.push('[');
                self.type_signature(sink, map)
            }
            Some(_) => Err(self.error("unexpected type tag")),
            None => Err(self.error("unexpected end of signature")),
        }
    }

    fn class_type_signature<F>(
        &mut self,
        sink: &mut Sink,
        map: &mut F,
    ) -> Result<(), DescriptorError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let stop = |b: u8| b == b'<' || b == b'.' || b == b';';
        let name = self.take_until(stop)?;
        if name.is_empty() || name.contains(['[', ':']) {
            return Err(self.error("invalid class name"));
        }

        sink.push('L');
        let mut binary = name.to_owned();
        let mut mapped = map(name).unwrap_or_else(|| name.to_owned());
        sink.push_str(&mapped);
        if self.peek() == Some(b'<') {
            self.type_arguments(sink, map)?;
        }

        while self.eat(b'.') {
            let simple = self.identifier(stop)?;
            let inner = format!("{binary}${simple}");
            let inner_mapped = map(&inner).unwrap_or_else(|| inner.clone());
            let inner_simple = remapped_simple_name(&inner, &inner_mapped, Some(mapped.as_str()))
                .unwrap_or_else(|| simple.to_owned());
            sink.push('.');
            sink.push_str(&inner_simple);
            binary = inner;
            mapped = inner_mapped;
            if self.peek() == Some(b'<') {
                self.type_arguments(sink, map)?;
            }
        }

        self.expect(b';')?;
        sink.push(';');
        Ok(())
    }

    fn type_arguments<F>(&mut self, sink: &mut Sink, map: &mut F) -> Result<(), DescriptorError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        self.expect(b'<')?;
        sink.push('<');
        loop {
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    sink.push('*');
                }
                Some(wildcard @ (b'+' | b'-')) => {
                    self.pos += 1;
                    sink.push(wildcard as char);
                    self.reference_signature(sink, map)?;
                }
                Some(_) => self.reference_signature(sink, map)?,
                None => return Err(self.error("unterminated type arguments")),
            }
            if self.eat(b'>') {
                sink.push('>');
                return Ok(());
            }
        }
    }
}
