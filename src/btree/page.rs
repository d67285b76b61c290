//! Binary codec for fixed-size B-Tree pages.
//!
//! A page is either a leaf (parallel sorted key and value sequences)
//! or an internal node (sorted keys plus one more child id than keys).
//! This module is the single place where the on-disk tag bits map to
//! the [`Page`] variants; nothing else in the engine discriminates by
//! raw flags.
//!
//! # On-disk layout
//!
//! ```text
//! [header:32][payload][zero-pad to pageSize]
//!
//! header   : [magic:u32 BE][version:u32 BE][flags:u32 BE][keyCount:u32 BE][reserved:16]
//!            flags bit0 = isLeaf
//! leaf     : keyCount × [kLen:i32 BE][kBytes][vLen:i32 BE][vBytes]
//! internal : [child₀:u32 BE] then keyCount × [kLen:i32 BE][kBytes][childᵢ₊₁:u32 BE]
//!            (keyCount = 0 ⇒ empty payload, degenerate empty internal)
//! ```
//!
//! Encoding fails with [`PageError::Overflow`] when header + payload
//! would exceed the page size; that is what bounds the splitter's
//! max-keys cap.

use byteorder::{BigEndian, WriteBytesExt};
use thiserror::Error;

/// Magic constant opening every page header.
pub const PAGE_MAGIC: u32 = 0xDEAD_BEEF;

/// Current page format version.
pub const PAGE_VERSION: u32 = 1;

/// Fixed page header size in bytes.
pub const PAGE_HEADER_SIZE: usize = 32;

const FLAG_LEAF: u32 = 1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by the page codec.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PageError {
    /// The encoded payload does not fit in one page.
    #[error("page overflow: {payload} payload bytes exceed page size {page_size}")]
    Overflow { payload: usize, page_size: usize },

    /// Bad magic, bad version, unsound lengths, or a payload that
    /// crosses the page boundary.
    #[error("corrupt page: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// Page variants
// ------------------------------------------------------------------------------------------------

/// One fixed-size B-Tree page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    /// Sorted keys with their values, same length.
    Leaf {
        keys: Vec<String>,
        values: Vec<Vec<u8>>,
    },

    /// Sorted separator keys with `keys.len() + 1` child page ids.
    Internal { keys: Vec<String>, children: Vec<u32> },
}

impl Page {
    /// A fresh empty leaf (the initial root).
    pub fn empty_leaf() -> Self {
        Page::Leaf {
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Number of keys on the page.
    pub fn key_count(&self) -> usize {
        match self {
            Page::Leaf { keys, .. } | Page::Internal { keys, .. } => keys.len(),
        }
    }

    /// `true` for the leaf variant.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Page::Leaf { .. })
    }
}

// ------------------------------------------------------------------------------------------------
// Encode
// ------------------------------------------------------------------------------------------------

/// Encodes a page into exactly `page_size` bytes (zero-padded).
pub fn encode_page(page: &Page, page_size: usize) -> Result<Vec<u8>, PageError> {
    let mut payload = Vec::new();

    match page {
        Page::Leaf { keys, values } => {
            debug_assert_eq!(keys.len(), values.len());
            for (key, value) in keys.iter().zip(values) {
                write_i32(&mut payload, key.len() as i32);
                payload.extend_from_slice(key.as_bytes());
                write_i32(&mut payload, value.len() as i32);
                payload.extend_from_slice(value);
            }
        }
        Page::Internal { keys, children } => {
            if !keys.is_empty() {
                debug_assert_eq!(children.len(), keys.len() + 1);
                write_u32(&mut payload, children[0]);
                for (i, key) in keys.iter().enumerate() {
                    write_i32(&mut payload, key.len() as i32);
                    payload.extend_from_slice(key.as_bytes());
                    write_u32(&mut payload, children[i + 1]);
                }
            }
        }
    }

    if PAGE_HEADER_SIZE + payload.len() > page_size {
        return Err(PageError::Overflow {
            payload: payload.len(),
            page_size,
        });
    }

    let mut buf = Vec::with_capacity(page_size);
    write_u32(&mut buf, PAGE_MAGIC);
    write_u32(&mut buf, PAGE_VERSION);
    write_u32(&mut buf, if page.is_leaf() { FLAG_LEAF } else { 0 });
    write_u32(&mut buf, page.key_count() as u32);
    buf.resize(PAGE_HEADER_SIZE, 0); // reserved
    buf.extend_from_slice(&payload);
    buf.resize(page_size, 0);

    Ok(buf)
}

// ------------------------------------------------------------------------------------------------
// Decode
// ------------------------------------------------------------------------------------------------

/// Decodes one page buffer produced by [`encode_page`].
pub fn decode_page(buf: &[u8]) -> Result<Page, PageError> {
    if buf.len() < PAGE_HEADER_SIZE {
        return Err(PageError::Corrupt(format!(
            "buffer is {} bytes, smaller than the {} byte header",
            buf.len(),
            PAGE_HEADER_SIZE
        )));
    }

    let magic = read_u32(buf, 0);
    let version = read_u32(buf, 4);
    let flags = read_u32(buf, 8);
    let key_count = read_u32(buf, 12) as usize;

    if magic != PAGE_MAGIC {
        return Err(PageError::Corrupt(format!("bad page magic {magic:#010x}")));
    }
    if version != PAGE_VERSION {
        return Err(PageError::Corrupt(format!(
            "unsupported page version {version}"
        )));
    }
    // Every key costs at least one payload byte, so a count larger
    // than the buffer cannot be honest.
    if key_count > buf.len() {
        return Err(PageError::Corrupt(format!(
            "key count {key_count} exceeds page capacity"
        )));
    }

    let mut cursor = Cursor {
        buf,
        pos: PAGE_HEADER_SIZE,
    };

    if flags & FLAG_LEAF != 0 {
        let mut keys = Vec::with_capacity(key_count);
        let mut values = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            keys.push(cursor.read_key()?);
            let val_len = cursor.read_i32()?;
            if val_len < 0 {
                return Err(PageError::Corrupt(format!(
                    "negative leaf value length {val_len}"
                )));
            }
            values.push(cursor.read_bytes(val_len as usize)?.to_vec());
        }
        Ok(Page::Leaf { keys, values })
    } else {
        // keyCount = 0 decodes to the degenerate empty internal page.
        if key_count == 0 {
            return Ok(Page::Internal {
                keys: Vec::new(),
                children: Vec::new(),
            });
        }

        let mut keys = Vec::with_capacity(key_count);
        let mut children = Vec::with_capacity(key_count + 1);
        children.push(cursor.read_u32()?);
        for _ in 0..key_count {
            keys.push(cursor.read_key()?);
            children.push(cursor.read_u32()?);
        }

        debug_assert_eq!(children.len(), keys.len() + 1);
        Ok(Page::Internal { keys, children })
    }
}

// ------------------------------------------------------------------------------------------------
// Cursor and integer helpers
// ------------------------------------------------------------------------------------------------

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn read_bytes(&mut self, len: usize) -> Result<&[u8], PageError> {
        if self.pos + len > self.buf.len() {
            return Err(PageError::Corrupt(format!(
                "field at {} crosses the page boundary",
                self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32, PageError> {
        let b = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u32(&mut self) -> Result<u32, PageError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_key(&mut self) -> Result<String, PageError> {
        let key_len = self.read_i32()?;
        if key_len <= 0 {
            return Err(PageError::Corrupt(format!(
                "unsound key length {key_len}"
            )));
        }
        let bytes = self.read_bytes(key_len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| PageError::Corrupt("key is not valid UTF-8".into()))
    }
}

fn write_i32(buf: &mut Vec<u8>, v: i32) {
    // Vec<u8> writes cannot fail.
    let _ = buf.write_i32::<BigEndian>(v);
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    let _ = buf.write_u32::<BigEndian>(v);
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
