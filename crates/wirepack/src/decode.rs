//! Zero-copy, bounds-checked decoding.
//!
//! A `Decoder` is a view over a byte slice. Reading advances the view;
//! entering a container returns a new decoder restricted to its body.

use crate::Error;
use crate::Result;
use crate::Tag;

#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes left in the view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Fails unless the view has been fully consumed.
    pub fn expect_end(&self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(Error::TrailingBytes(self.buf.len()))
        }
    }

    /// Returns the next tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let &b = self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let (head, tail) = self.buf.split_first_chunk::<N>().ok_or(Error::UnexpectedEnd)?;
        self.buf = tail;
        Ok(*head)
    }

    fn take_slice(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.take::<4>()?) as usize)
    }

    fn expect(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::UnexpectedTag { expected, found });
        }
        self.buf = &self.buf[1..];
        Ok(())
    }

    /// Skips the next item including any nested children.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.buf = &self.buf[1..];
        match tag.fixed_width() {
            Some(width) => {
                self.take_slice(width)?;
            }
            None => {
                let len = self.take_len()?;
                self.take_slice(len)?;
            }
        }
        Ok(())
    }

    pub fn unit(&mut self) -> Result<()> {
        self.expect(Tag::Unit)
    }

    pub fn null(&mut self) -> Result<()> {
        self.expect(Tag::Null)
    }

    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::True => { self.buf = &self.buf[1..]; Ok(true) }
            Tag::False => { self.buf = &self.buf[1..]; Ok(false) }
            found => Err(Error::UnexpectedTag { expected: Tag::True, found }),
        }
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.expect(Tag::U8)?;
        Ok(self.take::<1>()?[0])
    }

    pub fn s32(&mut self) -> Result<i32> {
        self.expect(Tag::S32)?;
        Ok(i32::from_le_bytes(self.take()?))
    }

    pub fn s64(&mut self) -> Result<i64> {
        self.expect(Tag::S64)?;
        Ok(i64::from_le_bytes(self.take()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.expect(Tag::U64)?;
        Ok(u64::from_le_bytes(self.take()?))
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.expect(Tag::F64)?;
        Ok(f64::from_le_bytes(self.take()?))
    }

    /// Decodes a borrowed UTF-8 string.
    pub fn str(&mut self) -> Result<&'a str> {
        self.expect(Tag::Str)?;
        let len = self.take_len()?;
        let bytes = self.take_slice(len)?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    /// Decodes a borrowed byte blob.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect(Tag::Bytes)?;
        let len = self.take_len()?;
        self.take_slice(len)
    }

    fn enter(&mut self, tag: Tag) -> Result<Decoder<'a>> {
        self.expect(tag)?;
        let len = self.take_len()?;
        Ok(Decoder::new(self.take_slice(len)?))
    }

    pub fn list(&mut self) -> Result<ListIter<'a>> {
        Ok(ListIter { body: self.enter(Tag::List)? })
    }

    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { body: self.enter(Tag::Map)? })
    }

    /// Decodes either side of a result, returning a decoder over its payload.
    pub fn result(&mut self) -> Result<std::result::Result<Decoder<'a>, Decoder<'a>>> {
        match self.peek_tag()? {
            Tag::Ok => Ok(Ok(self.enter(Tag::Ok)?)),
            Tag::Err => Ok(Err(self.enter(Tag::Err)?)),
            found => Err(Error::UnexpectedTag { expected: Tag::Ok, found }),
        }
    }

    /// Decodes a variant, returning `(name, payload)`.
    pub fn variant(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut body = self.enter(Tag::Variant)?;
        let name = body.str()?;
        Ok((name, body))
    }
}

/// Items of a list, each as its own decoder.
#[derive(Debug)]
pub struct ListIter<'a> {
    body: Decoder<'a>,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = Result<Decoder<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.body.is_empty() {
            return None;
        }
        let mut probe = self.body.clone();
        if let Err(e) = probe.skip() {
            // Leave the iterator exhausted after a malformed item.
            self.body = Decoder::new(&[]);
            return Some(Err(e));
        }
        let len = self.body.remaining() - probe.remaining();
        Some(self.body.take_slice(len).map(Decoder::new))
    }
}

/// Key/value pairs of a map.
#[derive(Debug)]
pub struct MapIter<'a> {
    body: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    /// Returns `(key, value)` for the next entry, or `None` at the end.
    pub fn next_entry(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.body.is_empty() {
            return Ok(None);
        }
        self.body.variant().map(Some)
    }
}
