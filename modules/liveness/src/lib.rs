//! Reachability probes for parsed endpoints and a bounded scheduler to run
//! them over a work set.

mod probe;
mod schedule;
mod tls;
mod ws;

pub use probe::{NetProber, ProbeError, Prober};
pub use schedule::{run_all, ProbeReport, WorkItem};
