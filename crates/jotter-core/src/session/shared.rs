//! Thread-safe session handle.

use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use crate::error::{Error, Result};
use crate::session::{AbortHandle, ExecuteOptions, ExecutionOutcome, Session, ShutdownResult};

/// A session shared between a transport and its interrupt handler.
///
/// At most one top-level execution runs at a time; a second concurrent
/// call fails with [`Error::ConcurrentExecution`] instead of waiting.
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<Session>>,
    abort: AbortHandle,
}

impl SharedSession {
    pub fn new(session: Session) -> Self {
        let abort = session.abort_handle();
        Self {
            inner: Arc::new(Mutex::new(session)),
            abort,
        }
    }

    /// Execute a snippet, failing fast if another one is running.
    pub fn execute(&self, code: &str, options: ExecuteOptions) -> Result<ExecutionOutcome> {
        let mut session = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(Error::ConcurrentExecution),
        };
        session.execute(code, options)
    }

    /// Interrupt the running snippet. Does not take the session lock.
    pub fn interrupt(&self) {
        self.abort.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Run `f` with exclusive access, waiting for a running snippet.
    pub fn with<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut session)
    }

    pub fn shutdown(&self) -> Vec<ShutdownResult> {
        self.with(Session::shutdown)
    }
}

impl std::fmt::Debug for SharedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSession")
            .field("aborted", &self.abort.is_aborted())
            .finish_non_exhaustive()
    }
}
