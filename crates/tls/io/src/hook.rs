//! User hook for peer certificate verification.

use std::{any::Any, fmt, sync::Arc};

use parking_lot::RwLock;

/// Opaque data handed back to a [`VerifyCallback`].
pub type CallbackData = Arc<dyn Any + Send + Sync>;

/// Callback consulted after the engine's built-in certificate verification.
///
/// Returns `true` to accept the peer.
pub type VerifyCallback =
    Arc<dyn Fn(&PeerVerification<'_>, Option<&CallbackData>) -> bool + Send + Sync>;

/// What the engine knows about the peer when the hook runs.
#[derive(Debug)]
pub struct PeerVerification<'a> {
    /// Name the session connects to.
    pub server_name: &'a str,
    /// DER certificates presented by the peer, end entity first.
    pub chain: &'a [&'a [u8]],
    /// Whether the built-in verification accepted the chain.
    pub preverified: bool,
}

/// A verify callback paired with its opaque data.
#[derive(Clone, Default)]
pub struct VerifyHook {
    /// The callback, if any.
    pub callback: Option<VerifyCallback>,
    /// Data passed to the callback.
    pub data: Option<CallbackData>,
}

impl fmt::Debug for VerifyHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyHook")
            .field("callback", &self.callback.is_some())
            .field("data", &self.data.is_some())
            .finish()
    }
}

/// Slot holding the current [`VerifyHook`].
///
/// The session and its engine share one slot, so replacing either half is
/// seen by a live engine on its next verification.
#[derive(Debug, Clone, Default)]
pub struct HookSlot(Arc<RwLock<VerifyHook>>);

impl HookSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the callback.
    pub fn set_callback(&self, callback: Option<VerifyCallback>) {
        self.0.write().callback = callback;
    }

    /// Replaces the callback data.
    pub fn set_data(&self, data: Option<CallbackData>) {
        self.0.write().data = data;
    }

    /// Returns a copy of the current hook.
    pub fn get(&self) -> VerifyHook {
        self.0.read().clone()
    }

    /// Runs the hook against a verification outcome.
    ///
    /// Without a callback the built-in outcome stands.
    pub fn verify(&self, peer: &PeerVerification<'_>) -> bool {
        let hook = self.get();
        match hook.callback {
            Some(callback) => callback(peer, hook.data.as_ref()),
            None => peer.preverified,
        }
    }
}
