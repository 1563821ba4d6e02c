//! Module containing the finite-horizon fixed-point solver types; the sweep
//! implementations live in [mpc_impl](crate::mpc_impl).

use crate::imports::*;
use crate::params::{CtrParameter, SolverParameter};
use crate::topology::LeaderTopology;

/// Order of the per-vehicle longitudinal model.
///
/// A closed set of dynamics; integrators and control law dispatch by `match`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum DynamicsOrder {
    /// speed responds to the command directly; the command difference with
    /// the leader drives the relative speed
    Second,
    /// the command passes through a first-order actuation lag
    #[default]
    Third,
}

/// Measured per-vehicle state handed to one horizon solve.
#[derive(Clone, Debug, PartialEq)]
pub struct PlatoonState {
    /// front-to-front spacing, m
    pub spacing: Array1<f64>,
    /// speed, m/s
    pub speed: Array1<f64>,
    /// leader speed minus own speed, m/s
    pub rel_speed: Array1<f64>,
    /// acceleration, m/s^2
    pub accel: Array1<f64>,
}

impl PlatoonState {
    pub fn n_veh(&self) -> usize {
        self.spacing.len()
    }

    /// Equilibrium platoon state: constant spacing and speed, zero relative
    /// speed and acceleration.
    pub fn equilibrium(n_veh: usize, spacing: f64, speed: f64) -> Self {
        Self {
            spacing: Array1::from_elem(n_veh, spacing),
            speed: Array1::from_elem(n_veh, speed),
            rel_speed: Array1::zeros(n_veh),
            accel: Array1::zeros(n_veh),
        }
    }
}

/// Horizon-by-vehicle state buffers, mutated in place by the forward sweep.
#[derive(Clone, Debug, PartialEq)]
pub struct StateTrajectory {
    pub s: Array2<f64>,
    pub v: Array2<f64>,
    pub dv: Array2<f64>,
    pub a: Array2<f64>,
}

impl StateTrajectory {
    pub fn new(s_hor: usize, n_veh: usize) -> Self {
        Self {
            s: Array2::zeros((s_hor, n_veh)),
            v: Array2::zeros((s_hor, n_veh)),
            dv: Array2::zeros((s_hor, n_veh)),
            a: Array2::zeros((s_hor, n_veh)),
        }
    }

    /// Write the measured state into the first row of every buffer
    pub fn set_initial(&mut self, state0: &PlatoonState) {
        self.s.row_mut(0).assign(&state0.spacing);
        self.v.row_mut(0).assign(&state0.speed);
        self.dv.row_mut(0).assign(&state0.rel_speed);
        self.a.row_mut(0).assign(&state0.accel);
    }
}

/// Adjoint buffers, one per state channel, filled by the backward sweep.
/// The zero initialization doubles as the terminal boundary condition.
#[derive(Clone, Debug, PartialEq)]
pub struct CostateTrajectory {
    pub ls: Array2<f64>,
    pub lv: Array2<f64>,
    pub la: Array2<f64>,
}

impl CostateTrajectory {
    pub fn new(s_hor: usize, n_veh: usize) -> Self {
        Self {
            ls: Array2::zeros((s_hor, n_veh)),
            lv: Array2::zeros((s_hor, n_veh)),
            la: Array2::zeros((s_hor, n_veh)),
        }
    }
}

/// How a solve ended.  Both variants carry a usable control; fatal outcomes
/// are errors instead (see [`PlatoonError`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// residual fell below the convergence threshold
    Converged,
    /// the soft iteration budget ran out; the control is best-effort
    BudgetExhausted,
}

/// First-step control vector plus convergence diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlSolution {
    /// acceleration command per vehicle at the first horizon step, m/s^2
    pub u: Array1<f64>,
    /// total fixed-point iterations spent
    pub iterations: usize,
    /// final costate residual
    pub residual: f64,
    pub termination: Termination,
}

/// One receding-horizon solve: owns its working buffers, borrows parameters
/// and the reference window.
pub struct HorizonSolver<'a> {
    pub order: DynamicsOrder,
    pub topology: &'a LeaderTopology,
    pub ctr_par: &'a CtrParameter,
    pub solver_par: &'a SolverParameter,
    /// target time gap window, `[s_hor x n_veh]`
    pub reference: ArrayView2<'a, f64>,
    /// length offset in the spacing error, m (vehicle length)
    pub l_veh: f64,
    /// actuation lag the controller models, s
    pub lag: f64,
    /// integration step, s
    pub dt: f64,
    /// externally imposed control superposed on the head vehicles
    /// (shared-leadership second-order variant)
    pub u_ext: Option<Array2<f64>>,
    pub state: StateTrajectory,
    pub costate: CostateTrajectory,
}

impl<'a> HorizonSolver<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order: DynamicsOrder,
        state0: &PlatoonState,
        reference: ArrayView2<'a, f64>,
        topology: &'a LeaderTopology,
        ctr_par: &'a CtrParameter,
        solver_par: &'a SolverParameter,
        l_veh: f64,
        lag: f64,
        dt: f64,
    ) -> anyhow::Result<Self> {
        let n_veh = topology.len();
        let s_hor = reference.nrows();
        ensure!(state0.n_veh() == n_veh, format_dbg!(state0.n_veh()));
        ensure!(reference.ncols() == n_veh, format_dbg!(reference.ncols()));
        ensure!(s_hor >= 2, format_dbg!(s_hor));
        ensure!(lag > 0.0, format_dbg!(lag));
        ensure!(dt > 0.0, format_dbg!(dt));

        let mut state = StateTrajectory::new(s_hor, n_veh);
        state.set_initial(state0);
        Ok(Self {
            order,
            topology,
            ctr_par,
            solver_par,
            reference,
            l_veh,
            lag,
            dt,
            u_ext: None,
            state,
            costate: CostateTrajectory::new(s_hor, n_veh),
        })
    }

    /// Superpose an external control sequence (e.g. the acceleration of a
    /// head vehicle driven from outside the platoon)
    pub fn with_external_control(mut self, u_ext: Array2<f64>) -> anyhow::Result<Self> {
        ensure!(
            u_ext.dim() == self.state.s.dim(),
            format_dbg!(u_ext.dim())
        );
        self.u_ext = Some(u_ext);
        Ok(self)
    }

    pub fn s_hor(&self) -> usize {
        self.state.s.nrows()
    }

    pub fn n_veh(&self) -> usize {
        self.state.s.ncols()
    }
}
