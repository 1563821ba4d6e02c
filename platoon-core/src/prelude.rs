//! Convenient re-export of the types most callers need.

pub use crate::closed_loop::{ClosedLoop, ClosedLoopResults, Scenario};
pub use crate::error::PlatoonError;
pub use crate::export::{export_tables, write_table};
pub use crate::mpc::{
    ControlSolution, DynamicsOrder, HorizonSolver, PlatoonState, Termination,
};
pub use crate::params::{CtrParameter, SimParameter, SolverParameter, VehParameter};
pub use crate::reference::{anticipation_time, GapEvent, ReferenceTrajectory};
pub use crate::topology::LeaderTopology;
pub use crate::traits::SerdeAPI;
