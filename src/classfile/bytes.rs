use super::ClassFormatError;

/// Big-endian cursor over class file bytes.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// The unread bytes, without consuming them.
    pub(crate) fn peek_rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    pub(crate) fn u1(&mut self) -> Result<u8, ClassFormatError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(ClassFormatError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    pub(crate) fn u2(&mut self) -> Result<u16, ClassFormatError> {
        let bytes = self.slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn u4(&mut self) -> Result<u32, ClassFormatError> {
        let bytes = self.slice(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn u8(&mut self) -> Result<u64, ClassFormatError> {
        let high = self.u4()? as u64;
        let low = self.u4()? as u64;
        Ok(high << 32 | low)
    }

    pub(crate) fn slice(&mut self, len: usize) -> Result<&'a [u8], ClassFormatError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(ClassFormatError::UnexpectedEof)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Reads a `u2` count followed by that many items.
    pub(crate) fn list<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, ClassFormatError>,
    ) -> Result<Vec<T>, ClassFormatError> {
        let count = self.u2()?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(item(self)?);
        }
        Ok(items)
    }
}

pub(crate) fn write_u1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub(crate) fn write_u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_u4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Writes a length as `u2`, failing if it does not fit.
pub(crate) fn write_count(
    out: &mut Vec<u8>,
    len: usize,
    what: &'static str,
) -> Result<(), ClassFormatError> {
    let count = u16::try_from(len).map_err(|_| ClassFormatError::TooLarge(what))?;
    write_u2(out, count);
    Ok(())
}
