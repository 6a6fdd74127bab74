//! Logging macros that pin the target to "socks5_proxy" for all log calls.
//!
//! Without an explicit target, tracing uses the full module path
//! (e.g., "socks5_proxy::server::handler"), which makes per-crate filtering
//! in embedding applications awkward. These macros keep every log line from
//! this crate under a single "socks5_proxy" target.

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "socks5_proxy", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "socks5_proxy", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "socks5_proxy", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "socks5_proxy", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "socks5_proxy", $($arg)*) };
}
