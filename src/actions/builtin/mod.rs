//! Built-in action plugins.
//!
//! Each submodule registers exactly one [`crate::actions::Plugin`] with the
//! process-wide registry. [`register_all`] is called once, from
//! [`crate::run_deploy`]/[`crate::run_describe`]/[`crate::run_run_action`],
//! before any task is decoded — registering a plugin twice is a bug, not a
//! recoverable condition, so `register_all` panics on the (only reachable
//! through programmer error) [`crate::error::SystemDeployError::PluginExists`].

mod copy;
mod editfile;
mod exec;
mod onchange;
mod platform;
mod systemd;

/// Registers every built-in plugin. Safe to call more than once across
/// independent test runs within the same process only if each test uses a
/// distinct plugin name; production call sites invoke this exactly once.
pub fn register_all() {
    copy::register();
    exec::register();
    editfile::register();
    onchange::register();
    platform::register();
    systemd::register();
}
