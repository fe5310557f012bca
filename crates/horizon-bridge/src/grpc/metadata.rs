//! Request metadata (gRPC headers).

use std::str::FromStr;

use tonic::metadata::{Ascii, KeyAndValueRef, MetadataKey, MetadataMap, MetadataValue};

use crate::error::{BridgeError, Result};

/// Metadata attached to an outgoing call.
///
/// ```ignore
/// let mut metadata = GrpcMetadata::new();
/// metadata.insert("x-request-id", "12345")?;
/// metadata.insert_binary("trace", &[0xde, 0xad])?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct GrpcMetadata {
    inner: MetadataMap,
}

impl GrpcMetadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an ASCII entry.
    pub fn insert(&mut self, key: &str, value: &str) -> Result<()> {
        let key = MetadataKey::<Ascii>::from_str(key).map_err(|e| {
            BridgeError::Configuration(format!("Invalid metadata key '{}': {}", key, e))
        })?;
        let value: MetadataValue<Ascii> = value.parse().map_err(|e| {
            BridgeError::Configuration(format!(
                "Invalid metadata value for '{}': {}",
                key.as_str(),
                e
            ))
        })?;
        self.inner.insert(key, value);
        Ok(())
    }

    /// Insert a binary entry. `-bin` is appended to the key when missing.
    pub fn insert_binary(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let key = binary_key(key);
        let key = MetadataKey::from_str(&key).map_err(|e| {
            BridgeError::Configuration(format!("Invalid metadata key '{}': {}", key, e))
        })?;
        self.inner.insert_bin(key, MetadataValue::from_bytes(value));
        Ok(())
    }

    /// Get an ASCII value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).and_then(|v| v.to_str().ok())
    }

    /// Get a binary value, decoded.
    pub fn get_binary(&self, key: &str) -> Option<Vec<u8>> {
        self.inner
            .get_bin(binary_key(key).as_str())
            .and_then(|v| v.to_bytes().ok())
            .map(|b| b.to_vec())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Copy every entry into `target`, replacing existing keys.
    pub(crate) fn apply_to(&self, target: &mut MetadataMap) {
        for entry in self.inner.iter() {
            match entry {
                KeyAndValueRef::Ascii(key, value) => {
                    target.insert(key.clone(), value.clone());
                }
                KeyAndValueRef::Binary(key, value) => {
                    target.insert_bin(key.clone(), value.clone());
                }
            }
        }
    }
}

fn binary_key(key: &str) -> String {
    if key.ends_with("-bin") {
        key.to_string()
    } else {
        format!("{}-bin", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut metadata = GrpcMetadata::new();
        metadata.insert("x-request-id", "abc").unwrap();
        metadata.insert_binary("trace", &[1, 2, 3]).unwrap();

        assert_eq!(metadata.get("x-request-id"), Some("abc"));
        assert_eq!(metadata.get_binary("trace"), Some(vec![1, 2, 3]));
        assert_eq!(metadata.get_binary("trace-bin"), Some(vec![1, 2, 3]));
        assert_eq!(metadata.len(), 2);
    }

    #[test]
    fn test_invalid_key_is_rejected() {
        let mut metadata = GrpcMetadata::new();
        assert!(metadata.insert("Bad Key", "v").unwrap_err().is_configuration());
        assert!(metadata.insert("ok", "line\nbreak").is_err());
        assert!(metadata.is_empty());
    }

    #[test]
    fn test_apply_to_request_metadata() {
        let mut metadata = GrpcMetadata::new();
        metadata.insert("authorization", "Bearer t").unwrap();
        metadata.insert_binary("blob", b"\x00\x01").unwrap();

        let mut target = MetadataMap::new();
        metadata.apply_to(&mut target);
        assert_eq!(
            target.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer t")
        );
        assert!(target.get_bin("blob-bin").is_some());
    }
}
