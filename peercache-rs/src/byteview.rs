//! Provides an immutable view on the bytes stored for a cache entry.
//!
//! A [ByteView] is what a [Group](crate::group::Group) hands out for every lookup. Cloning a view
//! is cheap, as the underlying buffer is reference counted. However, the buffer itself can never
//! be modified through a view. Whenever owned data is requested via
//! [byte_slice](ByteView::byte_slice) or [to_string](ToString::to_string), a fresh copy is
//! created, so that the value stored in the cache stays untouched.
//!
//! # Examples
//!
//! ```
//! # use peercache::byteview::ByteView;
//! let view = ByteView::from("Hello");
//!
//! // Obtain an owned copy and modify it...
//! let mut copy = view.byte_slice();
//! copy[0] = b'J';
//!
//! // ...the view itself remains unchanged.
//! assert_eq!(view.to_string(), "Hello");
//! assert_eq!(view.len(), 5);
//! ```
use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::lru::ByteSize;

/// Wraps an immutable sequence of bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ByteView {
    data: Bytes,
}

impl ByteView {
    /// Returns the number of bytes in this view.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Determines if this view contains no data at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns a copy of the underlying data.
    ///
    /// The returned vector is owned by the caller and can be modified without affecting the
    /// cached value.
    pub fn byte_slice(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl AsRef<[u8]> for ByteView {
    fn as_ref(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl Display for ByteView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        ByteView {
            data: Bytes::from(data),
        }
    }
}

impl From<Bytes> for ByteView {
    fn from(data: Bytes) -> Self {
        ByteView { data }
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        ByteView {
            data: Bytes::copy_from_slice(data.as_bytes()),
        }
    }
}

impl ByteSize for ByteView {
    fn allocated_size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::byteview::ByteView;
    use bytes::Bytes;

    #[test]
    fn copies_never_alias_the_stored_buffer() {
        let view = ByteView::from(vec![1, 2, 3]);

        let mut copy = view.byte_slice();
        copy[0] = 42;
        copy.push(4);

        assert_eq!(view.as_ref(), &[1, 2, 3]);
        assert_eq!(view.len(), 3);
    }

    #[test]
    fn clones_share_the_same_contents() {
        let view = ByteView::from(Bytes::from_static(b"shared"));
        let clone = view.clone();

        assert_eq!(view, clone);
        assert_eq!(clone.to_string(), "shared");
    }

    #[test]
    fn invalid_utf8_is_rendered_lossy() {
        let view = ByteView::from(vec![0x66, 0x6f, 0xff]);
        assert_eq!(view.to_string(), "fo\u{fffd}");
        assert!(!view.is_empty());
        assert!(ByteView::default().is_empty());
    }
}
