#![forbid(unsafe_code)]

mod leases;
mod runs;

pub use leases::*;
pub use runs::*;
