//! Class names in `META-INF/MANIFEST.MF`.

use tracing::debug;

use crate::resolver::SymbolResolver;

/// Path of the archive manifest.
pub(crate) const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// Main attributes that hold a class name.
const CLASS_ATTRIBUTES: [&str; 4] = [
    "Main-Class",
    "Launcher-Agent-Class",
    "Premain-Class",
    "Agent-Class",
];

/// Longest physical line in bytes, excluding the line break.
const MAX_LINE: usize = 72;

/// One header with its physical lines.
struct Header<'m> {
    physical: Vec<&'m str>,
    logical: String,
}

/// Rewrites the class-name attributes of a manifest.
///
/// Returns `None` when nothing changes, in which case the original bytes
/// are to be kept.
pub(crate) fn rewrite_manifest(data: &[u8], resolver: &SymbolResolver<'_>) -> Option<Vec<u8>> {
    let Ok(text) = std::str::from_utf8(data) else {
        debug!("manifest is not valid UTF-8, copying unchanged");
        return None;
    };
    let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };

    let mut headers: Vec<Header<'_>> = Vec::new();
    for line in text.split(newline) {
        match (line.strip_prefix(' '), headers.last_mut()) {
            (Some(continuation), Some(header)) if !header.logical.is_empty() => {
                header.physical.push(line);
                header.logical.push_str(continuation);
            }
            _ => headers.push(Header {
                physical: vec![line],
                logical: line.to_owned(),
            }),
        }
    }

    let mut changed = false;
    let mut lines = Vec::with_capacity(headers.len());
    for header in &headers {
        match rewrite_header(&header.logical, resolver) {
            Some(rewritten) => {
                changed = true;
                lines.push(wrap(&rewritten, newline));
            }
            None => lines.push(header.physical.join(newline)),
        }
    }

    changed.then(|| lines.join(newline).into_bytes())
}

fn rewrite_header(header: &str, resolver: &SymbolResolver<'_>) -> Option<String> {
    let (name, value) = header.split_once(": ")?;
    if !CLASS_ATTRIBUTES
        .iter()
        .any(|attribute| attribute.eq_ignore_ascii_case(name))
    {
        return None;
    }
    let class = value.trim().replace('.', "/");
    let new_class = resolver.resolve_class(&class).new_name()?.replace('/', ".");
    debug!(attribute = name, old = value.trim(), new = %new_class, "rewrote manifest attribute");
    Some(format!("{name}: {new_class}"))
}

/// Splits a header into physical lines of at most [`MAX_LINE`] bytes.
fn wrap(header: &str, newline: &str) -> String {
    let mut out = String::with_capacity(header.len() + 8);
    let mut rest = header;
    let mut limit = MAX_LINE;
    while rest.len() > limit {
        let mut split = limit;
        while !rest.is_char_boundary(split) {
            split -= 1;
        }
        out.push_str(&rest[..split]);
        out.push_str(newline);
        out.push(' ');
        rest = &rest[split..];
        // the leading space counts against the limit
        limit = MAX_LINE - 1;
    }
    out.push_str(rest);
    out
}
