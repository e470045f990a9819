//! Scope-checked encoder.
//!
//! The encoder keeps a stack of open containers. Length headers are written
//! as placeholders when a container opens and patched when it closes, so the
//! caller never has to know a body size up front.

use crate::Error;
use crate::Result;
use crate::Scope;
use crate::Tag;

/// An open container on the encoder stack.
struct Open {
    /// Offset of the first body byte (just past the length placeholder).
    body: usize,
    scope: Scope,
    items: usize,
}

/// A bounded, state-machine driven encoder.
///
/// # Structural rules
///
/// 1. Inside a map only variants (key/value pairs) may be written.
/// 2. Results and variants hold exactly one item.
/// 3. `finish` fails unless every container has been closed.
pub struct Encoder {
    buf: Vec<u8>,
    open: Vec<Open>,
}

macro_rules! fixed {
    ($(#[$doc:meta] $name:ident($ty:ty) => $tag:expr;)*) => {
        $(
            #[$doc]
            pub fn $name(&mut self, v: $ty) -> Result<()> {
                self.tag($tag)?;
                self.buf.extend_from_slice(&v.to_le_bytes());
                self.item_done();
                Ok(())
            }
        )*
    };
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256), open: Vec::with_capacity(8) }
    }

    /// Consumes the encoder and returns the encoded bytes.
    pub fn finish(self) -> Result<Vec<u8>> {
        if !self.open.is_empty() {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    fn scope(&self) -> Scope {
        self.open.last().map_or(Scope::Root, |o| o.scope)
    }

    fn check(&self, tag: Tag) -> Result<()> {
        match self.open.last() {
            None => Ok(()),
            Some(o) => match o.scope {
                Scope::Root | Scope::List => Ok(()),
                Scope::Map if tag == Tag::Variant => Ok(()),
                Scope::Map => Err(Error::InvalidMapEntry),
                Scope::Result | Scope::Variant if o.items >= 1 => Err(Error::TooManyItems(o.scope)),
                Scope::Result | Scope::Variant => Ok(()),
            },
        }
    }

    fn item_done(&mut self) {
        if let Some(o) = self.open.last_mut() {
            o.items += 1;
        }
    }

    fn tag(&mut self, tag: Tag) -> Result<()> {
        self.check(tag)?;
        self.buf.push(tag as u8);
        Ok(())
    }

    fn len_prefix(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| Error::TooLarge(len))?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        Ok(())
    }

    fn open_scope(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.tag(tag)?;
        self.buf.extend_from_slice(&[0; 4]);
        self.open.push(Open { body: self.buf.len(), scope, items: 0 });
        Ok(())
    }

    fn close_scope(&mut self, expected: Scope) -> Result<()> {
        let actual = self.scope();
        let Some(top) = self.open.last() else {
            return Err(Error::ScopeUnderflow);
        };
        if actual != expected {
            return Err(Error::ScopeMismatch { expected, actual });
        }
        if matches!(actual, Scope::Result | Scope::Variant) && top.items == 0 {
            return Err(Error::EmptyScope(actual));
        }

        let body = top.body;
        self.open.pop();
        let len = self.buf.len() - body;
        let len = u32::try_from(len).map_err(|_| Error::TooLarge(len))?;
        self.buf[body - 4..body].copy_from_slice(&len.to_le_bytes());
        self.item_done();
        Ok(())
    }

    /// Encodes unit `()`.
    pub fn unit(&mut self) -> Result<()> {
        self.tag(Tag::Unit)?;
        self.item_done();
        Ok(())
    }

    /// Encodes an absent value.
    pub fn null(&mut self) -> Result<()> {
        self.tag(Tag::Null)?;
        self.item_done();
        Ok(())
    }

    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.tag(if v { Tag::True } else { Tag::False })?;
        self.item_done();
        Ok(())
    }

    fixed! {
        /// Encodes a u8.
        u8(u8) => Tag::U8;
        /// Encodes an i32 (LE).
        s32(i32) => Tag::S32;
        /// Encodes an i64 (LE).
        s64(i64) => Tag::S64;
        /// Encodes a u64 (LE).
        u64(u64) => Tag::U64;
        /// Encodes an f64 (LE).
        f64(f64) => Tag::F64;
    }

    /// Encodes a UTF-8 string blob.
    pub fn str(&mut self, v: &str) -> Result<()> {
        self.blob(Tag::Str, v.as_bytes())
    }

    /// Encodes a raw byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.blob(Tag::Bytes, v)
    }

    fn blob(&mut self, tag: Tag, v: &[u8]) -> Result<()> {
        if u32::try_from(v.len()).is_err() {
            return Err(Error::TooLarge(v.len()));
        }
        self.tag(tag)?;
        self.len_prefix(v.len())?;
        self.buf.extend_from_slice(v);
        self.item_done();
        Ok(())
    }

    pub fn list_begin(&mut self) -> Result<()> { self.open_scope(Tag::List, Scope::List) }
    pub fn list_end(&mut self) -> Result<()> { self.close_scope(Scope::List) }

    /// Begins a map. Only `variant_begin` is accepted as a direct child.
    pub fn map_begin(&mut self) -> Result<()> { self.open_scope(Tag::Map, Scope::Map) }
    pub fn map_end(&mut self) -> Result<()> { self.close_scope(Scope::Map) }

    /// Begins the success side of a result; exactly one item must follow.
    pub fn ok_begin(&mut self) -> Result<()> { self.open_scope(Tag::Ok, Scope::Result) }
    /// Begins the failure side of a result; exactly one item must follow.
    pub fn err_begin(&mut self) -> Result<()> { self.open_scope(Tag::Err, Scope::Result) }
    /// Closes either side of a result.
    pub fn result_end(&mut self) -> Result<()> { self.close_scope(Scope::Result) }

    /// Begins a named payload. The name is written immediately; exactly one
    /// payload item must follow before `variant_end`.
    pub fn variant_begin(&mut self, name: &str) -> Result<()> {
        self.open_scope(Tag::Variant, Scope::Variant)?;
        self.str(name)?;
        if let Some(o) = self.open.last_mut() {
            o.items = 0;
        }
        Ok(())
    }
    pub fn variant_end(&mut self) -> Result<()> { self.close_scope(Scope::Variant) }

    /// Writes `key => payload` inside a map.
    pub fn field(&mut self, key: &str, payload: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        self.variant_begin(key)?;
        payload(self)?;
        self.variant_end()
    }
}
