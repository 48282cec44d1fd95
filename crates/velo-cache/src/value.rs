//! Packed header/body value format.
//!
//! An `HttpValue` packs response headers and body into one byte buffer,
//! which is the unit of insertion into the byte cache:
//!
//! ```text
//! [ type id (1 byte) | headers length (4 bytes LE) | headers | body ]
//! ```
//!
//! The type-identifier byte disambiguates storage formats across
//! versions; buffers that fail validation are rejected, never trusted.
//! Values are shared by reference: `share` freezes the buffer into a
//! refcounted handle, and any mutation after sharing copies first.

use crate::error::CacheError;
use crate::headers::ResponseHeaders;
use crate::Result;
use bytes::{Bytes, BytesMut};

/// Storage format identifier at offset 0.
const TYPE_ID: u8 = b'V';

/// Bytes of prelude before the headers block.
const PRELUDE: usize = 5;

/// A packed response: headers block plus body in one buffer.
#[derive(Debug, Default)]
pub struct HttpValue {
    /// The packed buffer while this value is writable.
    buf: BytesMut,
    /// Body bytes written before the headers arrive.
    early_body: Vec<u8>,
    /// Set once the value has been shared or linked.
    shared: Option<Bytes>,
    has_headers: bool,
}

impl HttpValue {
    /// Creates an empty value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets to the empty state, releasing any shared storage.
    pub fn clear(&mut self) {
        self.buf = BytesMut::new();
        self.early_body.clear();
        self.shared = None;
        self.has_headers = false;
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        !self.has_headers && self.early_body.is_empty() && self.buf.is_empty()
    }

    /// True if this value holds the sole reference to its storage,
    /// which is required before in-place mutation.
    pub fn unique(&self) -> bool {
        match &self.shared {
            Some(bytes) => bytes.is_unique(),
            None => true,
        }
    }

    /// Writes the headers block.
    ///
    /// May be called at most once between `clear` invocations, either
    /// before any body write or after all of them.
    pub fn set_headers(&mut self, headers: &ResponseHeaders) -> Result<()> {
        if self.has_headers {
            return Err(CacheError::InvalidState("headers already set"));
        }
        self.make_writable();
        let block = headers.to_block();
        let mut buf = BytesMut::with_capacity(PRELUDE + block.len() + self.early_body.len());
        buf.extend_from_slice(&[TYPE_ID]);
        buf.extend_from_slice(&(block.len() as u32).to_le_bytes());
        buf.extend_from_slice(&block);
        buf.extend_from_slice(&self.early_body);
        self.early_body = Vec::new();
        self.buf = buf;
        self.has_headers = true;
        Ok(())
    }

    /// Appends body bytes. Body written before `set_headers` is
    /// buffered and spliced in when the headers arrive.
    pub fn write(&mut self, data: &[u8]) {
        if self.has_headers {
            self.make_writable();
            self.buf.extend_from_slice(data);
        } else {
            self.early_body.extend_from_slice(data);
        }
    }

    /// Extracts the headers. Returns `None` while empty.
    pub fn extract_headers(&self) -> Result<Option<ResponseHeaders>> {
        if !self.has_headers {
            return Ok(None);
        }
        let contents = self.contents();
        let headers_len = Self::size_of_first_chunk(contents)?;
        let block = &contents[PRELUDE..PRELUDE + headers_len];
        ResponseHeaders::from_block(block).map(Some)
    }

    /// Extracts the body as a slice of this value's storage. Returns
    /// `None` while empty.
    pub fn extract_contents(&self) -> Result<Option<&[u8]>> {
        if !self.has_headers {
            return Ok(None);
        }
        let contents = self.contents();
        let headers_len = Self::size_of_first_chunk(contents)?;
        Ok(Some(&contents[PRELUDE + headers_len..]))
    }

    /// Extracts the body as a refcounted handle without copying.
    /// Requires the value to have been shared or linked.
    pub fn body_bytes(&self) -> Result<Option<Bytes>> {
        match &self.shared {
            Some(bytes) => {
                let headers_len = Self::size_of_first_chunk(bytes)?;
                Ok(Some(bytes.slice(PRELUDE + headers_len..)))
            }
            None => Ok(self
                .extract_contents()?
                .map(|body| Bytes::copy_from_slice(body))),
        }
    }

    /// Freezes the buffer and returns the shared storage handle
    /// suitable for cache insertion. Requires headers to be present.
    pub fn share(&mut self) -> Result<Bytes> {
        if !self.has_headers {
            return Err(CacheError::InvalidState("cannot share before set_headers"));
        }
        if self.shared.is_none() {
            let frozen = std::mem::take(&mut self.buf).freeze();
            self.shared = Some(frozen);
        }
        Ok(self.shared.as_ref().map(Bytes::clone).unwrap_or_default())
    }

    /// Aliases the storage of a stored buffer (refcount bump).
    ///
    /// Returns false without touching `self` if the buffer fails
    /// structural validation; corruption must never crash the cache.
    pub fn link(&mut self, stored: &Bytes) -> bool {
        if Self::size_of_first_chunk(stored).is_err() {
            return false;
        }
        self.buf = BytesMut::new();
        self.early_body.clear();
        self.shared = Some(stored.clone());
        self.has_headers = true;
        true
    }

    /// Total size of the packed buffer.
    pub fn size(&self) -> usize {
        self.contents().len()
    }

    /// Body length derived from the stored headers-block length.
    pub fn compute_contents_size(&self) -> Result<usize> {
        let contents = self.contents();
        let headers_len = Self::size_of_first_chunk(contents)?;
        Ok(contents.len() - PRELUDE - headers_len)
    }

    fn contents(&self) -> &[u8] {
        match &self.shared {
            Some(bytes) => bytes,
            None => &self.buf,
        }
    }

    /// Validates the prelude and returns the headers-block length.
    fn size_of_first_chunk(contents: &[u8]) -> Result<usize> {
        if contents.len() < PRELUDE {
            return Err(CacheError::CorruptValue("buffer shorter than prelude".to_string()));
        }
        if contents[0] != TYPE_ID {
            return Err(CacheError::CorruptValue(format!(
                "unknown type id {:#04x}",
                contents[0]
            )));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&contents[1..PRELUDE]);
        let headers_len = u32::from_le_bytes(len_bytes) as usize;
        if PRELUDE + headers_len > contents.len() {
            return Err(CacheError::CorruptValue(format!(
                "headers length {} exceeds buffer",
                headers_len
            )));
        }
        Ok(headers_len)
    }

    /// Triggers copy-on-write if the storage is shared.
    fn make_writable(&mut self) {
        if let Some(bytes) = self.shared.take() {
            self.buf = match bytes.try_into_mut() {
                Ok(writable) => writable,
                Err(still_shared) => BytesMut::from(&still_shared[..]),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_headers() -> ResponseHeaders {
        let mut headers = ResponseHeaders::new(200);
        headers.add("Content-Type", "image/png");
        headers
    }

    #[test]
    fn headers_then_body() {
        let mut value = HttpValue::new();
        value.set_headers(&sample_headers()).unwrap();
        value.write(b"body ");
        value.write(b"bytes");

        let headers = value.extract_headers().unwrap().unwrap();
        assert_eq!(headers.get("Content-Type"), Some("image/png"));
        assert_eq!(value.extract_contents().unwrap().unwrap(), b"body bytes");
        assert_eq!(value.compute_contents_size().unwrap(), 10);
    }

    #[test]
    fn body_before_headers_is_buffered() {
        let mut value = HttpValue::new();
        value.write(b"early");
        value.set_headers(&sample_headers()).unwrap();
        value.write(b" late");
        assert_eq!(value.extract_contents().unwrap().unwrap(), b"early late");
    }

    #[test]
    fn empty_value_extracts_nothing() {
        let value = HttpValue::new();
        assert!(value.extract_headers().unwrap().is_none());
        assert!(value.extract_contents().unwrap().is_none());
        assert!(value.is_empty());
    }

    #[test]
    fn second_set_headers_is_rejected() {
        let mut value = HttpValue::new();
        value.set_headers(&sample_headers()).unwrap();
        assert!(value.set_headers(&sample_headers()).is_err());

        value.clear();
        assert!(value.set_headers(&sample_headers()).is_ok());
    }

    #[test]
    fn share_and_link_alias_storage() {
        let mut value = HttpValue::new();
        value.set_headers(&sample_headers()).unwrap();
        value.write(b"shared body");
        let stored = value.share().unwrap();

        let mut linked = HttpValue::new();
        assert!(linked.link(&stored));
        assert_eq!(linked.extract_contents().unwrap().unwrap(), b"shared body");
        assert!(!linked.unique());
    }

    #[test]
    fn mutation_after_share_copies() {
        let mut value = HttpValue::new();
        value.set_headers(&sample_headers()).unwrap();
        value.write(b"v1");
        let stored = value.share().unwrap();
        assert!(!value.unique());

        // Writing triggers copy-on-write; the shared handle keeps v1.
        value.write(b"+more");
        assert_eq!(value.extract_contents().unwrap().unwrap(), b"v1+more");

        let mut reader = HttpValue::new();
        assert!(reader.link(&stored));
        assert_eq!(reader.extract_contents().unwrap().unwrap(), b"v1");
    }

    #[test]
    fn link_rejects_corruption() {
        let mut value = HttpValue::new();
        assert!(!value.link(&Bytes::from_static(b"")));
        assert!(!value.link(&Bytes::from_static(b"X\x00\x00\x00\x00")));
        // Headers length pointing past the buffer.
        assert!(!value.link(&Bytes::from_static(b"V\xff\x00\x00\x00")));
        assert!(value.is_empty());
    }

    #[test]
    fn body_bytes_is_zero_copy_after_share() {
        let mut value = HttpValue::new();
        value.set_headers(&sample_headers()).unwrap();
        value.write(b"zero copy");
        let _stored = value.share().unwrap();
        let body = value.body_bytes().unwrap().unwrap();
        assert_eq!(body.as_ref(), b"zero copy");
    }
}
