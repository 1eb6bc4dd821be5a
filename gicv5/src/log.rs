//! Guest-error log sink.
//!
//! Guest-observable errors (reserved-register access, bad
//! encodings, unreachable interrupts, failed memory transactions) are never
//! propagated to the caller as a `Result::Err` — they are logged at a
//! severity distinct from host-side errors and otherwise absorbed. This
//! module is that distinct sink: a thin wrapper over the `log` crate's
//! `warn!` target mechanism so an embedder can route it separately (e.g. to
//! a per-guest diagnostics buffer) by filtering on the `"gicv5::guest"`
//! target, without the core needing to know anything about that routing.

/// Log a guest-observable error: a condition the architecture specifies as
/// "RAZ/WI with a log" rather than a fault or a host error.
macro_rules! guest_error {
    ($($arg:tt)+) => {
        ::log::warn!(target: "gicv5::guest", $($arg)+)
    };
}

pub(crate) use guest_error;
