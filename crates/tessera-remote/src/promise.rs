//! Write-once result handles.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tessera_core::codec::from_bytes;
use tessera_core::Wire;

use crate::error::PromiseError;

/// Identifies a promise: the requesting rank in the high 32 bits, a
/// per-rank sequence number in the low 32 bits. Responders route the
/// answer back to [`origin()`](Self::origin).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromiseId(pub u64);

impl PromiseId {
    /// Compose an id from the requesting rank and a sequence number.
    pub const fn new(origin: u32, sequence: u32) -> Self {
        Self(((origin as u64) << 32) | sequence as u64)
    }

    /// Rank that created the promise.
    pub const fn origin(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin(), self.0 as u32)
    }
}

/// A value that will be produced by another partition.
///
/// Created unresolved; fulfilled exactly once, either with the encoded
/// value or with the responder's error message. Clones share the slot.
#[derive(Clone, Debug)]
pub struct Promise {
    id: PromiseId,
    slot: Arc<OnceLock<Result<Vec<u8>, String>>>,
}

impl Promise {
    /// A new unresolved promise.
    pub fn new(id: PromiseId) -> Self {
        Self {
            id,
            slot: Arc::new(OnceLock::new()),
        }
    }

    /// The promise id.
    pub fn id(&self) -> PromiseId {
        self.id
    }

    /// True once the promise has been fulfilled (with a value or an
    /// error).
    pub fn is_ready(&self) -> bool {
        self.slot.get().is_some()
    }

    /// The encoded value.
    ///
    /// Fails with [`PromiseError::NotReady`] before fulfilment and with
    /// [`PromiseError::Remote`] if the responder failed.
    pub fn get(&self) -> Result<&[u8], PromiseError> {
        match self.slot.get() {
            None => Err(PromiseError::NotReady { id: self.id }),
            Some(Ok(bytes)) => Ok(bytes.as_slice()),
            Some(Err(reason)) => Err(PromiseError::Remote {
                id: self.id,
                reason: reason.clone(),
            }),
        }
    }

    /// The value decoded as `T`.
    pub fn get_as<T: Wire>(&self) -> Result<T, PromiseError> {
        Ok(from_bytes(self.get()?)?)
    }

    /// Resolve the promise. A second call fails with
    /// [`PromiseError::AlreadyFulfilled`] and leaves the first value in
    /// place.
    pub fn fulfil(&self, value: Result<Vec<u8>, String>) -> Result<(), PromiseError> {
        self.slot
            .set(value)
            .map_err(|_| PromiseError::AlreadyFulfilled { id: self.id })
    }
}
