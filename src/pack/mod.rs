//! Transport-agnostic packing for values exchanged across a fleet
//!
//! Every type that crosses a process boundary implements [`Packable`]:
//! it reports its packed size up front, writes itself into a caller-owned
//! buffer at a caller-advanced position, and reads itself back the same way.
//! Because the position is threaded through by the caller, many values can be
//! concatenated into one buffer for a single bulk transfer.
//!
//! # Wire format
//!
//! All scalars are little-endian with no padding. [`IdPair`] packs its
//! element first and then the 8-byte identity:
//!
//! ```text
//! ┌──────────────────────────┬──────────────────┐
//! │ element (T::pack bytes)  │ id (u64, LE)     │
//! └──────────────────────────┴──────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use libra_effort::pack::{make_id_pair, IdPair, Packable};
//!
//! let pair = make_id_pair(42u32, 7);
//! let mut buf = vec![0u8; pair.packed_size()];
//! let mut pos = 0;
//! pair.pack(&mut buf, &mut pos).unwrap();
//!
//! let mut read = 0;
//! let back = IdPair::<u32>::unpack(&buf, &mut read).unwrap();
//! assert_eq!(back, pair);
//! assert_eq!(read, pos);
//! ```

mod counter;

pub use counter::CountingSink;

use std::fmt;
use thiserror::Error;

/// Size in bytes of the identity field of an [`IdPair`]
pub const ID_SIZE: usize = std::mem::size_of::<u64>();

/// Errors raised while packing or unpacking
#[derive(Error, Debug, PartialEq)]
pub enum PackError {
    #[error("Buffer too small: need {needed} bytes, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Truncated input: need {needed} bytes at offset {offset}, buffer holds {len}")]
    Truncated {
        needed: usize,
        offset: usize,
        len: usize,
    },

    #[error("Invalid packed data: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, PackError>;

/// Capability for values that can be packed into a flat byte buffer
pub trait Packable: Sized {
    /// Number of bytes [`Packable::pack`] will write for this value
    fn packed_size(&self) -> usize;

    /// Write this value into `buf` starting at `*position`, advancing it
    fn pack(&self, buf: &mut [u8], position: &mut usize) -> Result<()>;

    /// Read a value from `buf` starting at `*position`, advancing it by
    /// exactly the number of bytes the matching `pack` wrote
    fn unpack(buf: &[u8], position: &mut usize) -> Result<Self>;
}

/// Copy raw bytes into `buf` at `position`, checking capacity first
pub(crate) fn put_bytes(buf: &mut [u8], position: &mut usize, bytes: &[u8]) -> Result<()> {
    let end = *position + bytes.len();
    if end > buf.len() {
        return Err(PackError::BufferTooSmall {
            needed: end,
            available: buf.len(),
        });
    }
    buf[*position..end].copy_from_slice(bytes);
    *position = end;
    Ok(())
}

/// Borrow `N` bytes from `buf` at `position`, advancing it
pub(crate) fn take_bytes<const N: usize>(buf: &[u8], position: &mut usize) -> Result<[u8; N]> {
    let end = *position + N;
    if end > buf.len() {
        return Err(PackError::Truncated {
            needed: N,
            offset: *position,
            len: buf.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[*position..end]);
    *position = end;
    Ok(out)
}

macro_rules! impl_packable_scalar {
    ($($ty:ty),*) => {
        $(
            impl Packable for $ty {
                fn packed_size(&self) -> usize {
                    std::mem::size_of::<$ty>()
                }

                fn pack(&self, buf: &mut [u8], position: &mut usize) -> Result<()> {
                    put_bytes(buf, position, &self.to_le_bytes())
                }

                fn unpack(buf: &[u8], position: &mut usize) -> Result<Self> {
                    Ok(<$ty>::from_le_bytes(take_bytes(buf, position)?))
                }
            }
        )*
    };
}

impl_packable_scalar!(u32, u64, f64);

/// Vectors pack as a `u64` element count followed by each element
impl<T: Packable> Packable for Vec<T> {
    fn packed_size(&self) -> usize {
        ID_SIZE + self.iter().map(Packable::packed_size).sum::<usize>()
    }

    fn pack(&self, buf: &mut [u8], position: &mut usize) -> Result<()> {
        (self.len() as u64).pack(buf, position)?;
        for item in self {
            item.pack(buf, position)?;
        }
        Ok(())
    }

    fn unpack(buf: &[u8], position: &mut usize) -> Result<Self> {
        let len = u64::unpack(buf, position)? as usize;
        // Every element occupies at least one byte, so a length larger than the
        // remaining buffer can only come from corrupt input.
        if len > buf.len().saturating_sub(*position) {
            return Err(PackError::Invalid(format!(
                "vector length {} exceeds remaining {} bytes",
                len,
                buf.len().saturating_sub(*position)
            )));
        }
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(T::unpack(buf, position)?);
        }
        Ok(out)
    }
}

/// A packable element tagged with a numeric identity
#[derive(Debug, Clone, PartialEq)]
pub struct IdPair<T> {
    /// Payload
    pub element: T,
    /// Identity, unique across the fleet for one exchange round
    pub id: u64,
}

impl<T> IdPair<T> {
    pub fn new(element: T, id: u64) -> Self {
        Self { element, id }
    }
}

/// Build an [`IdPair`] with type inference
pub fn make_id_pair<T>(element: T, id: u64) -> IdPair<T> {
    IdPair::new(element, id)
}

impl<T: Packable> Packable for IdPair<T> {
    fn packed_size(&self) -> usize {
        self.element.packed_size() + ID_SIZE
    }

    fn pack(&self, buf: &mut [u8], position: &mut usize) -> Result<()> {
        self.element.pack(buf, position)?;
        self.id.pack(buf, position)
    }

    fn unpack(buf: &[u8], position: &mut usize) -> Result<Self> {
        let element = T::unpack(buf, position)?;
        let id = u64::unpack(buf, position)?;
        Ok(IdPair { element, id })
    }
}

impl<T: fmt::Display> fmt::Display for IdPair<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}>", self.element, self.id)
    }
}

/// Pack a slice of values back to back into a freshly sized buffer
///
/// The buffer is sized in one pass by counting bytes through a
/// [`CountingSink`], so no intermediate allocations are made.
pub fn pack_all<T: Packable>(items: &[T]) -> Result<Vec<u8>> {
    let mut sink = CountingSink::<u8>::new();
    for item in items {
        sink.advance(item.packed_size());
    }
    let total = ID_SIZE + sink.count();

    let mut buf = vec![0u8; total];
    let mut position = 0;
    (items.len() as u64).pack(&mut buf, &mut position)?;
    for item in items {
        item.pack(&mut buf, &mut position)?;
    }
    debug_assert_eq!(position, total);
    Ok(buf)
}

/// Reverse of [`pack_all`]; the whole buffer must be consumed
pub fn unpack_all<T: Packable>(buf: &[u8]) -> Result<Vec<T>> {
    let mut position = 0;
    let items = Vec::<T>::unpack(buf, &mut position)?;
    if position != buf.len() {
        return Err(PackError::Invalid(format!(
            "{} trailing bytes after {} items",
            buf.len() - position,
            items.len()
        )));
    }
    Ok(items)
}
