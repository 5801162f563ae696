//! Store keys and typed value helpers
//!
//! The ephemeral store only knows bytes. This module fixes how keys are
//! canonicalized and how typed values are laid out on top of it.

use async_trait::async_trait;
use ras_core::{EphemeralStore, RasError, RasResult, ReviewerId, SessionId};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::time::Duration;

/// Width of a canonical integer key
pub const INT_KEY_LEN: usize = 8;

/// Width of the structured-value length prefix
const LEN_PREFIX: usize = 4;

/// Canonical byte key
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey(Vec<u8>);

impl StoreKey {
    /// Key from an arbitrary string
    pub fn string(key: &str) -> Self {
        StoreKey(key.as_bytes().to_vec())
    }

    /// Key from an integer, fixed-width big-endian with the sign bit flipped
    /// so byte order matches numeric order
    pub fn int(key: i64) -> Self {
        StoreKey(int_key_bytes(key).to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for StoreKey {
    fn from(key: &str) -> Self {
        StoreKey::string(key)
    }
}

impl From<String> for StoreKey {
    fn from(key: String) -> Self {
        StoreKey(key.into_bytes())
    }
}

impl From<i64> for StoreKey {
    fn from(key: i64) -> Self {
        StoreKey::int(key)
    }
}

impl From<SessionId> for StoreKey {
    fn from(id: SessionId) -> Self {
        StoreKey::string(&id.store_key())
    }
}

impl From<ReviewerId> for StoreKey {
    fn from(id: ReviewerId) -> Self {
        StoreKey::int(id.0)
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if self.0.len() != INT_KEY_LEN => write!(f, "StoreKey({s:?})"),
            _ => write!(f, "StoreKey({:?})", self.0),
        }
    }
}

/// Canonical integer key bytes
pub fn int_key_bytes(key: i64) -> [u8; INT_KEY_LEN] {
    ((key as u64) ^ (1 << 63)).to_be_bytes()
}

/// Inverse of [`int_key_bytes`]
pub fn parse_int_key(bytes: &[u8]) -> Option<i64> {
    let arr: [u8; INT_KEY_LEN] = bytes.try_into().ok()?;
    Some((u64::from_be_bytes(arr) ^ (1 << 63)) as i64)
}

/// Length-prefixed JSON encoding for structured values
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> RasResult<Vec<u8>> {
    let body = serde_json::to_vec(value)?;
    let len = u32::try_from(body.len())
        .map_err(|_| RasError::Internal(format!("value of {} bytes is too large", body.len())))?;
    let mut bytes = Vec::with_capacity(LEN_PREFIX + body.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Decode a value written by [`encode_json`]
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> RasResult<T> {
    if bytes.len() < LEN_PREFIX {
        return Err(RasError::Decode(format!(
            "structured value needs a {LEN_PREFIX}-byte prefix, got {} bytes",
            bytes.len()
        )));
    }
    let (prefix, body) = bytes.split_at(LEN_PREFIX);
    let mut len = [0u8; LEN_PREFIX];
    len.copy_from_slice(prefix);
    let declared = u32::from_be_bytes(len) as usize;
    if declared != body.len() {
        return Err(RasError::Decode(format!(
            "length prefix says {declared} bytes, body has {}",
            body.len()
        )));
    }
    serde_json::from_slice(body).map_err(|e| RasError::Decode(e.to_string()))
}

fn fixed_width<const N: usize>(bytes: &[u8], what: &str) -> RasResult<[u8; N]> {
    bytes.try_into().map_err(|_| {
        RasError::Decode(format!("{what} needs {N} bytes, got {}", bytes.len()))
    })
}

/// Typed access layered over any [`EphemeralStore`]
#[async_trait]
pub trait TypedStore: EphemeralStore {
    async fn put_bytes(
        &self,
        key: &StoreKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> RasResult<()> {
        self.put(key.as_bytes(), value, ttl).await
    }

    async fn get_bytes(&self, key: &StoreKey) -> RasResult<Vec<u8>> {
        self.get(key.as_bytes()).await
    }

    async fn delete_key(&self, key: &StoreKey) -> RasResult<bool> {
        self.delete(key.as_bytes()).await
    }

    async fn put_string(
        &self,
        key: &StoreKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> RasResult<()> {
        self.put_bytes(key, value.as_bytes().to_vec(), ttl).await
    }

    async fn get_string(&self, key: &StoreKey) -> RasResult<String> {
        let bytes = self.get_bytes(key).await?;
        String::from_utf8(bytes).map_err(|e| RasError::Decode(e.to_string()))
    }

    async fn put_i64(&self, key: &StoreKey, value: i64, ttl: Option<Duration>) -> RasResult<()> {
        self.put_bytes(key, value.to_be_bytes().to_vec(), ttl).await
    }

    async fn get_i64(&self, key: &StoreKey) -> RasResult<i64> {
        let bytes = self.get_bytes(key).await?;
        Ok(i64::from_be_bytes(fixed_width(&bytes, "i64")?))
    }

    async fn put_u64(&self, key: &StoreKey, value: u64, ttl: Option<Duration>) -> RasResult<()> {
        self.put_bytes(key, value.to_be_bytes().to_vec(), ttl).await
    }

    async fn get_u64(&self, key: &StoreKey) -> RasResult<u64> {
        let bytes = self.get_bytes(key).await?;
        Ok(u64::from_be_bytes(fixed_width(&bytes, "u64")?))
    }

    async fn put_bool(&self, key: &StoreKey, value: bool, ttl: Option<Duration>) -> RasResult<()> {
        self.put_bytes(key, vec![u8::from(value)], ttl).await
    }

    async fn get_bool(&self, key: &StoreKey) -> RasResult<bool> {
        let bytes = self.get_bytes(key).await?;
        let [byte] = fixed_width::<1>(&bytes, "bool")?;
        match byte {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(RasError::Decode(format!("bool byte must be 0 or 1, got {other}"))),
        }
    }

    async fn put_byte(&self, key: &StoreKey, value: u8, ttl: Option<Duration>) -> RasResult<()> {
        self.put_bytes(key, vec![value], ttl).await
    }

    async fn get_byte(&self, key: &StoreKey) -> RasResult<u8> {
        let bytes = self.get_bytes(key).await?;
        let [byte] = fixed_width::<1>(&bytes, "byte")?;
        Ok(byte)
    }

    async fn put_f64(&self, key: &StoreKey, value: f64, ttl: Option<Duration>) -> RasResult<()> {
        self.put_bytes(key, value.to_bits().to_be_bytes().to_vec(), ttl).await
    }

    async fn get_f64(&self, key: &StoreKey) -> RasResult<f64> {
        let bytes = self.get_bytes(key).await?;
        Ok(f64::from_bits(u64::from_be_bytes(fixed_width(&bytes, "f64")?)))
    }

    async fn put_json<T>(&self, key: &StoreKey, value: &T, ttl: Option<Duration>) -> RasResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let bytes = encode_json(value)?;
        self.put_bytes(key, bytes, ttl).await
    }

    async fn get_json<T>(&self, key: &StoreKey) -> RasResult<T>
    where
        T: DeserializeOwned + Send,
    {
        let bytes = self.get_bytes(key).await?;
        decode_json(&bytes)
    }
}

impl<S: EphemeralStore + ?Sized> TypedStore for S {}
