//! Size guards and diagnostics handed to every encoder and decoder.

use std::fmt;
use std::sync::Arc;

/// Matches the broker's default `socket.request.max.bytes`.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 100 * 1024 * 1024;

/// Brokers put no natural bound on response size, so the client picks one.
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 100 * 1024 * 1024;

/// Observer for internal invariant violations such as unbalanced push/pop.
pub type InvariantHook = Arc<dyn Fn(&InvariantViolation) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// `pop` called with no open push.
    PopWithoutPush,
    /// encoding or decoding finished with `n` pushes still open.
    UnbalancedPush(usize),
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::PopWithoutPush => write!(f, "pop without a matching push"),
            InvariantViolation::UnbalancedPush(n) => write!(f, "{n} pushes left unpopped"),
        }
    }
}

/// Read-only codec configuration.
#[derive(Clone)]
pub struct Config {
    /// Encoding fails once the output would grow past this many bytes.
    pub max_request_size: usize,
    /// Any declared length (or decompressed payload) beyond this fails decoding.
    pub max_response_size: usize,
    pub invariant_hook: Option<InvariantHook>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            invariant_hook: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("max_request_size", &self.max_request_size)
            .field("max_response_size", &self.max_response_size)
            .field("invariant_hook", &self.invariant_hook.is_some())
            .finish()
    }
}

impl Config {
    pub fn with_max_request_size(mut self, max: usize) -> Self {
        self.max_request_size = max;
        self
    }

    pub fn with_max_response_size(mut self, max: usize) -> Self {
        self.max_response_size = max;
        self
    }

    pub fn with_invariant_hook(
        mut self,
        hook: impl Fn(&InvariantViolation) + Send + Sync + 'static,
    ) -> Self {
        self.invariant_hook = Some(Arc::new(hook));
        self
    }

    /// Hands the violation to the installed hook, if any, and returns it as text
    /// for the caller's error.
    pub(crate) fn report(&self, violation: InvariantViolation) -> String {
        tracing::error!(%violation, "codec invariant violated");
        if let Some(hook) = &self.invariant_hook {
            hook(&violation);
        }
        violation.to_string()
    }
}
