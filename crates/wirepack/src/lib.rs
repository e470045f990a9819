//! # Wirepack
//!
//! A small, bounded, self-describing binary encoding used for every message
//! that crosses a node boundary.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]`
//!
//! All integers are little-endian. Every item is prefixed with its tag, so a
//! decoder can skip fields it does not understand and values can be decoded
//! without an external schema.

pub mod decode;
pub mod encode;

pub use decode::Decoder;
pub use decode::ListIter;
pub use decode::MapIter;
pub use encode::Encoder;


/// Wirepack encoding and decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a known `Tag`.
    InvalidTag(u8),
    /// Found a valid tag other than the one the caller asked for.
    UnexpectedTag { expected: Tag, found: Tag },
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Bytes left over after the last expected item.
    TrailingBytes(usize),
    /// Blob or container body exceeds `u32::MAX` bytes.
    TooLarge(usize),
    /// Closing a scope that is not the innermost open scope.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// Closing a scope when only the root is open.
    ScopeUnderflow,
    /// Finishing the buffer while scopes are still open.
    ScopeStillOpen,
    /// A single-item scope (result or variant) received a second item.
    TooManyItems(Scope),
    /// A single-item scope (result or variant) was closed while empty.
    EmptyScope(Scope),
    /// Only variants may appear directly inside a map.
    InvalidMapEntry,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "invalid tag byte {:#04x}", b),
            Error::UnexpectedTag { expected, found } => {
                write!(f, "expected {:?}, found {:?}", expected, found)
            }
            Error::InvalidUtf8 => write!(f, "string is not valid utf-8"),
            Error::UnexpectedEnd => write!(f, "unexpected end of buffer"),
            Error::TrailingBytes(n) => write!(f, "{} trailing bytes", n),
            Error::TooLarge(len) => write!(f, "body of {} bytes does not fit a u32 length", len),
            Error::ScopeMismatch { expected, actual } => {
                write!(f, "scope mismatch: closing {:?} but {:?} is open", expected, actual)
            }
            Error::ScopeUnderflow => write!(f, "no open scope to close"),
            Error::ScopeStillOpen => write!(f, "encoder finished with open scopes"),
            Error::TooManyItems(s) => write!(f, "{:?} scope holds exactly one item", s),
            Error::EmptyScope(s) => write!(f, "{:?} scope closed without its item", s),
            Error::InvalidMapEntry => write!(f, "map entries must be variants"),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for wirepack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the kind of the encoded item.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Unit = 0x01,
    Null = 0x02,
    True = 0x03,
    False = 0x04,
    U8 = 0x05,
    S32 = 0x06,
    S64 = 0x07,
    U64 = 0x08,
    F64 = 0x09,

    // Blobs (Tag + u32 Len + Bytes)
    Str = 0x10,
    Bytes = 0x11,

    // Containers (Tag + u32 Len + Body)
    List = 0x20,
    Map = 0x21,
    Ok = 0x30,
    Err = 0x31,
    Variant = 0x32,
}

impl Tag {
    /// Returns the tag for a byte, or `None` if the byte is not a tag.
    pub fn from_u8(b: u8) -> Option<Self> {
        let tag = match b {
            0x01 => Tag::Unit,
            0x02 => Tag::Null,
            0x03 => Tag::True,
            0x04 => Tag::False,
            0x05 => Tag::U8,
            0x06 => Tag::S32,
            0x07 => Tag::S64,
            0x08 => Tag::U64,
            0x09 => Tag::F64,
            0x10 => Tag::Str,
            0x11 => Tag::Bytes,
            0x20 => Tag::List,
            0x21 => Tag::Map,
            0x30 => Tag::Ok,
            0x31 => Tag::Err,
            0x32 => Tag::Variant,
            _ => return None,
        };
        Some(tag)
    }

    /// Width of the fixed payload following the tag, `None` for length-prefixed items.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Tag::Unit | Tag::Null | Tag::True | Tag::False => Some(0),
            Tag::U8 => Some(1),
            Tag::S32 => Some(4),
            Tag::S64 | Tag::U64 | Tag::F64 => Some(8),
            Tag::Str | Tag::Bytes | Tag::List | Tag::Map | Tag::Ok | Tag::Err | Tag::Variant => None,
        }
    }
}

/// Kinds of open containers tracked by the `Encoder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The virtual root; allows any number of items.
    Root,
    /// Ordered sequence of items.
    List,
    /// Key-value container; only variants are allowed.
    Map,
    /// Ok or Err payload; exactly one item.
    Result,
    /// Named payload; exactly one item after the name.
    Variant,
}
