//! Crate containing receding-horizon control models for truck-platooning
//! maneuvers: a finite-horizon forward/backward costate sweep solver, the
//! tactical gap-reference generator, and the closed-loop simulation harness
//! around them.

#[macro_use]
pub mod macros;

pub mod bridge;
pub mod closed_loop;
pub mod error;
pub mod export;
pub mod imports;
pub mod mpc;
pub mod mpc_impl;
pub mod params;
pub mod prelude;
pub mod reference;
pub mod topology;
pub mod traits;
pub mod utils;
