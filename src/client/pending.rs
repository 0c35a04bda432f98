//! Pending-call registry keyed by sequence number.
//!
//! Sequence numbers, not method names, identify responses: one connection
//! may have many outstanding calls to the same method. The registry is the
//! single source of truth for "is this call still awaiting a response".

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::call::Call;
use crate::error::RpcError;

#[derive(Default)]
struct State {
    next_seq: u64,
    calls: HashMap<u64, Call>,
    /// Local intent to stop.
    closing: bool,
    /// Peer or I/O forced stop.
    shutdown: bool,
}

/// Calls awaiting a response on one connection.
pub(crate) struct PendingCalls {
    state: Mutex<State>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_seq: 1,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assign the next sequence number and store the call.
    ///
    /// Hands the call back with [`RpcError::Shutdown`] once the registry is
    /// closing or shut down.
    pub(crate) fn register(&self, mut call: Call) -> Result<u64, (RpcError, Call)> {
        let mut state = self.lock();
        if state.closing || state.shutdown {
            return Err((RpcError::Shutdown, call));
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        call.seq = seq;
        state.calls.insert(seq, call);
        Ok(seq)
    }

    /// Look up and delete a call. `None` if it was already removed.
    pub(crate) fn remove(&self, seq: u64) -> Option<Call> {
        self.lock().calls.remove(&seq)
    }

    pub(crate) fn contains(&self, seq: u64) -> bool {
        self.lock().calls.contains_key(&seq)
    }

    /// Mark the registry shut down and fail every pending call with `err`.
    ///
    /// Returns the number of calls resolved.
    pub(crate) fn terminate_all(&self, err: RpcError) -> usize {
        let mut calls: Vec<Call> = {
            let mut state = self.lock();
            state.shutdown = true;
            state.calls.drain().map(|(_, call)| call).collect()
        };
        calls.sort_unstable_by_key(|call| call.seq);

        let count = calls.len();
        for call in calls {
            call.fail(err.clone());
        }
        count
    }

    /// Record the local intent to stop. Fails if already closing.
    pub(crate) fn set_closing(&self) -> Result<(), RpcError> {
        let mut state = self.lock();
        if state.closing {
            return Err(RpcError::Shutdown);
        }
        state.closing = true;
        Ok(())
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.lock().closing
    }

    /// True while neither closing nor shut down.
    pub(crate) fn is_available(&self) -> bool {
        let state = self.lock();
        !state.closing && !state.shutdown
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().calls.len()
    }
}
