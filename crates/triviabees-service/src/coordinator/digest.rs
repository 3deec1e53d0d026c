use std::fmt::{self, Write};

use serde_json::Value;
use sha2::{Digest, Sha256};

/// The identity of a generation request, used for request coalescing and as the cache key.
///
/// Two requests with the same kind and the same payload share a digest, regardless of the order
/// in which the payload's object keys were inserted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestDigest([u8; 32]);

impl RequestDigest {
    /// Computes the digest of a `kind` and `payload`.
    pub fn new(kind: &str, payload: &Value) -> Self {
        let mut builder = DigestBuilder::new(kind);
        builder.write_payload(payload);
        builder.build()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for RequestDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            f.write_fmt(format_args!("{b:02x}"))?;
        }
        Ok(())
    }
}

impl fmt::Debug for RequestDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestDigest({self})")
    }
}

/// A builder for [`RequestDigest`]s.
///
/// The builder collects human readable, but most importantly **stable**, metadata which is then
/// hashed with SHA-256.
pub struct DigestBuilder {
    metadata: String,
}

impl DigestBuilder {
    pub fn new(kind: &str) -> Self {
        Self {
            metadata: format!("kind: {kind}\n"),
        }
    }

    /// Writes the payload in canonical JSON form, with all object keys sorted.
    pub fn write_payload(&mut self, payload: &Value) {
        self.metadata.push_str("payload: ");
        write_canonical(&mut self.metadata, payload);
        self.metadata.push('\n');
    }

    /// Returns the metadata collected so far.
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Finalize the [`RequestDigest`].
    pub fn build(self) -> RequestDigest {
        let hash = Sha256::digest(self.metadata.as_bytes());
        let mut bytes = [0; 32];
        bytes.copy_from_slice(&hash);
        RequestDigest(bytes)
    }
}

impl fmt::Write for DigestBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.metadata.write_str(s)
    }
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(out, value);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        leaf => out.push_str(&leaf.to_string()),
    }
}
