// Shared encoder with per-consumer zero points
//
// Each consumer acquires a reference id that remembers the raw reading at the
// moment it was taken, so several consumers can treat the same encoder as
// zeroed at different times. Ids are never reused; released references are
// dropped from the table.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::EncoderDevice;
use crate::error::{Error, Result};

/// Handle to one consumer's zero point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceId(usize);

impl ReferenceId {
    /// The absolute reference, zeroed when the encoder was created
    pub const ABSOLUTE: ReferenceId = ReferenceId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

pub struct Encoder {
    name: String,
    state: Mutex<EncoderState>,
}

struct EncoderState {
    device: Box<dyn EncoderDevice>,
    zeros: HashMap<usize, f64>,
    next_id: usize,
}

impl Encoder {
    pub fn new(name: impl Into<String>, device: Box<dyn EncoderDevice>) -> Self {
        let name = name.into();
        let origin = device.ticks().unwrap_or_else(|e| {
            warn!("Encoder {} unreadable at startup: {}", name, e);
            0.0
        });
        Self {
            name,
            state: Mutex::new(EncoderState {
                device,
                zeros: HashMap::from([(ReferenceId::ABSOLUTE.0, origin)]),
                next_id: ReferenceId::ABSOLUTE.0 + 1,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MutexGuard<'_, EncoderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// New reference zeroed at the current reading
    pub fn acquire_reference(&self) -> ReferenceId {
        let mut state = self.state();
        let zero = match state.device.ticks() {
            Ok(ticks) => ticks,
            Err(e) => {
                warn!("Encoder {} unreadable, new reference uses origin: {}", self.name, e);
                state.zeros.get(&ReferenceId::ABSOLUTE.0).copied().unwrap_or(0.0)
            }
        };
        let id = state.next_id;
        state.next_id += 1;
        state.zeros.insert(id, zero);
        ReferenceId(id)
    }

    /// Ticks since the reference was zeroed
    pub fn position(&self, id: ReferenceId) -> Result<f64> {
        let state = self.state();
        let zero = self.zero(&state, id)?;
        Ok(state.device.ticks()? - zero)
    }

    /// Ticks since the encoder was created
    pub fn absolute_position(&self) -> Result<f64> {
        self.position(ReferenceId::ABSOLUTE)
    }

    /// Re-zero a reference at the current reading
    pub fn reset(&self, id: ReferenceId) -> Result<()> {
        let mut state = self.state();
        self.zero(&state, id)?;
        let ticks = state.device.ticks()?;
        state.zeros.insert(id.0, ticks);
        Ok(())
    }

    /// Release a reference; the absolute reference cannot be released
    pub fn release(&self, id: ReferenceId) {
        if id == ReferenceId::ABSOLUTE {
            warn!("Encoder {} refusing to release the absolute reference", self.name);
            return;
        }
        if self.state().zeros.remove(&id.0).is_none() {
            error!("Encoder {} has no reference {}", self.name, id.0);
        }
    }

    /// Live references, the absolute one included
    pub fn reference_count(&self) -> usize {
        self.state().zeros.len()
    }

    fn zero(&self, state: &EncoderState, id: ReferenceId) -> Result<f64> {
        match state.zeros.get(&id.0).copied() {
            Some(zero) => Ok(zero),
            None => {
                error!("Encoder {} has no reference {}", self.name, id.0);
                Err(Error::UnknownReference(id.0))
            }
        }
    }
}
