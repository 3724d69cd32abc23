//! Process-wide engine state.
//!
//! Some engines need global setup (locking callbacks, library init) before
//! the first session exists and teardown after the last one is gone. Every
//! session holds a [`ProcessGuard`]; the first guard installs the hooks and
//! the last one uninstalls them.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::EngineError;

/// Global setup and teardown of an engine implementation.
pub trait ProcessHooks: Send + Sync {
    /// Installs process-wide state.
    fn install(&self) -> Result<(), EngineError>;

    /// Releases process-wide state.
    fn uninstall(&self);
}

struct ProcessState {
    sessions: usize,
    hooks: Option<Arc<dyn ProcessHooks>>,
}

static STATE: Mutex<ProcessState> = Mutex::new(ProcessState {
    sessions: 0,
    hooks: None,
});

/// Reference held by every live session.
#[derive(Debug)]
pub struct ProcessGuard {
    _private: (),
}

impl ProcessGuard {
    /// Registers a session, installing `hooks` if none are installed yet.
    ///
    /// Hooks installed by an earlier session stay in place until the last
    /// guard is dropped; later hooks are not installed alongside them.
    pub fn acquire(hooks: Option<Arc<dyn ProcessHooks>>) -> Result<Self, EngineError> {
        let mut state = STATE.lock();

        if state.hooks.is_none() {
            if let Some(hooks) = hooks {
                hooks.install()?;
                tracing::debug!("installed process-wide engine state");
                state.hooks = Some(hooks);
            }
        }
        state.sessions += 1;

        Ok(Self { _private: () })
    }

    /// Returns the number of live guards.
    pub fn live() -> usize {
        STATE.lock().sessions
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let mut state = STATE.lock();

        state.sessions -= 1;
        if state.sessions == 0 {
            if let Some(hooks) = state.hooks.take() {
                hooks.uninstall();
                tracing::debug!("uninstalled process-wide engine state");
            }
        }
    }
}
