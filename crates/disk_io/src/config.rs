//! Queue configuration: concurrency limits, priority and backend policy.

/// Submission window used when `max_sim_requests` is 0.
///
/// 64 entries per queue (usually one queue per disk) keep a device busy
/// without exhausting the system-wide asynchronous I/O limit.
pub const DEFAULT_MAX_SIM_REQUESTS: usize = 64;

/// Which pending operation kind the poster drains first when both are queued.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PriorityOp {
    /// Post pending reads before pending writes.
    Read,
    /// Post pending writes before pending reads.
    #[default]
    Write,
    /// Post in strict enqueue order regardless of kind.
    None,
}

impl PriorityOp {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::None => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Read,
            1 => Self::Write,
            _ => Self::None,
        }
    }
}

/// Controls which OS context backs a queue.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum BackendPolicy {
    /// Use io_uring when available, fall back to the portable context.
    #[default]
    Auto,
    /// Require io_uring; queue creation fails if it is unavailable.
    Enabled,
    /// Always use the portable context.
    Disabled,
}

/// Configuration for an [`AioQueue`](crate::AioQueue).
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct QueueConfig {
    /// Maximum number of requests registered with the OS at once.
    ///
    /// 0 selects [`DEFAULT_MAX_SIM_REQUESTS`]. The OS may grant fewer; the
    /// queue halves the request until context creation succeeds.
    pub max_sim_requests: usize,
    /// Maximum number of completion events collected per wait cycle.
    ///
    /// 0 means "as many as the submission window". Values above the
    /// negotiated window are clamped to it.
    pub max_events: usize,
    /// Kind drained first when reads and writes are both pending.
    pub priority: PriorityOp,
    /// OS context selection.
    pub backend: BackendPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_sim_requests: 0,
            max_events: 0,
            priority: PriorityOp::Write,
            backend: BackendPolicy::Auto,
        }
    }
}

impl QueueConfig {
    /// Creates a config for a device that should only see one request at a time.
    #[must_use]
    pub fn serialized() -> Self {
        Self {
            max_sim_requests: 1,
            max_events: 1,
            ..Self::default()
        }
    }

    /// Creates a config with a deep submission window for fast devices.
    #[must_use]
    pub fn for_fast_devices() -> Self {
        Self {
            max_sim_requests: 256,
            max_events: 64,
            ..Self::default()
        }
    }

    /// Sets the submission window.
    pub fn with_max_sim_requests(mut self, max_sim_requests: usize) -> Self {
        self.max_sim_requests = max_sim_requests;
        self
    }

    /// Sets the number of events collected per wait cycle.
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    /// Sets the priority operation.
    pub fn with_priority(mut self, priority: PriorityOp) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the backend policy.
    pub fn with_backend(mut self, backend: BackendPolicy) -> Self {
        self.backend = backend;
        self
    }

    /// Returns the submission window to request from the OS.
    #[must_use]
    pub fn requested_window(&self) -> usize {
        if self.max_sim_requests == 0 {
            DEFAULT_MAX_SIM_REQUESTS
        } else {
            self.max_sim_requests
        }
    }

    /// Returns the events-per-wait limit for a negotiated `window`.
    #[must_use]
    pub fn events_per_wait(&self, window: usize) -> usize {
        if self.max_events == 0 {
            window
        } else {
            self.max_events.min(window)
        }
    }
}
