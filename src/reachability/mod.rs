//! Reachability primitives: the SSH probe, open-port reconciliation, and the
//! host waiter built on both.

mod ports;
mod probe;
mod waiter;

pub use ports::{PortReconciliation, candidate_ports, find_open_port, reconcile_open_port};
pub use probe::probe;
pub use waiter::HostWaiter;

#[cfg(test)]
mod tests;
