//! Module containing the sweep implementations for [mpc](crate::mpc): the
//! forward state evolution, the backward costate evolution, and the damped
//! fixed-point loop coupling them through the stationarity condition of the
//! Hamiltonian.

use crate::imports::*;
use crate::mpc::{ControlSolution, CostateTrajectory, DynamicsOrder, HorizonSolver, Termination};
use crate::utils::{clip_inplace, frob_diff};

impl<'a> HorizonSolver<'a> {
    /// Explicit-Euler propagation of the platoon state under the candidate
    /// control sequence `u`, one scalar per vehicle per step, already clipped
    /// to the actuator bounds.
    ///
    /// Third order: relative speed integrates the leader/follower
    /// acceleration difference and the command passes through the actuation
    /// lag.  Second order: the command difference with the leader (plus any
    /// external head control) drives the relative speed directly.
    pub fn forward_evolution(&mut self, u: &Array2<f64>) {
        let (s_hor, n_veh) = self.state.s.dim();
        match self.order {
            DynamicsOrder::Third => {
                for i in 0..s_hor - 1 {
                    for j in 0..n_veh {
                        let da = match self.topology.leader(j) {
                            Some(ldr) => self.state.a[[i, ldr]] - self.state.a[[i, j]],
                            None => 0.0,
                        };
                        self.state.dv[[i + 1, j]] = self.state.dv[[i, j]] + self.dt * da;
                        self.state.s[[i + 1, j]] =
                            self.state.s[[i, j]] + self.dt * self.state.dv[[i, j]];
                        self.state.v[[i + 1, j]] =
                            self.state.v[[i, j]] + self.dt * self.state.a[[i, j]];
                        self.state.a[[i + 1, j]] = (1.0 - self.dt / self.lag)
                            * self.state.a[[i, j]]
                            + self.dt / self.lag * u[[i, j]];
                    }
                }
            }
            DynamicsOrder::Second => {
                for i in 0..s_hor - 1 {
                    for j in 0..n_veh {
                        let mut du = u[[i, self.topology.leader_or_self(j)]] - u[[i, j]];
                        if let Some(u_ext) = &self.u_ext {
                            du += u_ext[[i, j]];
                        }
                        self.state.dv[[i + 1, j]] = self.state.dv[[i, j]] + self.dt * du;
                        self.state.s[[i + 1, j]] =
                            self.state.s[[i, j]] + self.dt * self.state.dv[[i, j]];
                        self.state.v[[i + 1, j]] = self.state.v[[i, j]] + self.dt * u[[i, j]];
                    }
                }
            }
        }
    }

    /// Backward Euler walk of the adjoint variables from the terminal
    /// condition (zero costates) down to the first step, along the current
    /// state trajectory and the reference window.
    ///
    /// The instantaneous spacing error is `e = s - (v * tau + l_veh)`.  The
    /// relative-speed term enters with its factor of two from the quadratic
    /// running cost; the acceleration costate only exists for the
    /// third-order model.
    pub fn backward_evolution(&self) -> CostateTrajectory {
        let (s_hor, n_veh) = self.state.s.dim();
        let mut fresh = CostateTrajectory::new(s_hor, n_veh);
        let c_spc = self.ctr_par.c_spc;
        let c_rel = self.ctr_par.c_rel;
        for i in (1..s_hor).rev() {
            for j in 0..n_veh {
                let tau = self.reference[[i, j]];
                let e = self.state.s[[i, j]] - (self.state.v[[i, j]] * tau + self.l_veh);
                fresh.lv[[i - 1, j]] = fresh.lv[[i, j]]
                    + self.dt
                        * (-2.0 * c_spc * e * tau
                            - 2.0 * c_rel * self.state.dv[[i, j]]
                            - fresh.ls[[i, j]]);
                fresh.ls[[i - 1, j]] = fresh.ls[[i, j]] + self.dt * (2.0 * c_spc * e);
                if self.order == DynamicsOrder::Third {
                    fresh.la[[i - 1, j]] = fresh.la[[i, j]]
                        + self.dt * (fresh.lv[[i, j]] - fresh.la[[i, j]] / self.lag);
                }
            }
        }
        fresh
    }

    /// Candidate control from the stationarity condition of the Hamiltonian,
    /// not yet clipped
    fn control_law(&self) -> Array2<f64> {
        let c_ctr = self.ctr_par.c_ctr;
        match self.order {
            DynamicsOrder::Third => self.costate.la.mapv(|la| -la / (2.0 * c_ctr * self.lag)),
            DynamicsOrder::Second => self.costate.lv.mapv(|lv| -lv / (2.0 * c_ctr)),
        }
    }

    /// Iterate candidate control -> forward sweep -> backward sweep -> damped
    /// costate blend until the residual between accumulated and fresh
    /// costates settles.
    ///
    /// Returns the first-step control vector with diagnostics.  Divergence
    /// and the hard iteration ceiling are fatal; running out of the soft
    /// iteration budget returns the best control found so far.
    pub fn compute_control(&mut self) -> anyhow::Result<ControlSolution> {
        let par = self.solver_par;
        let mut alpha = par.alpha_0;
        let mut inner: usize = 0;
        let mut total: usize = 0;

        loop {
            let mut u_star = self.control_law();
            clip_inplace(&mut u_star, self.ctr_par.u_min, self.ctr_par.u_max);

            self.forward_evolution(&u_star);
            let fresh = self.backward_evolution();

            self.costate
                .ls
                .zip_mut_with(&fresh.ls, |acc, &new| *acc = (1.0 - alpha) * *acc + alpha * new);
            self.costate
                .lv
                .zip_mut_with(&fresh.lv, |acc, &new| *acc = (1.0 - alpha) * *acc + alpha * new);
            self.costate
                .la
                .zip_mut_with(&fresh.la, |acc, &new| *acc = (1.0 - alpha) * *acc + alpha * new);

            let mut residual = frob_diff(&self.costate.ls, &fresh.ls)
                + frob_diff(&self.costate.lv, &fresh.lv);
            if self.order == DynamicsOrder::Third {
                residual += frob_diff(&self.costate.la, &fresh.la);
            }

            total += 1;
            inner += 1;

            if residual <= par.eps {
                return Ok(ControlSolution {
                    u: u_star.row(0).to_owned(),
                    iterations: total,
                    residual,
                    termination: Termination::Converged,
                });
            }
            if residual > par.div_threshold {
                return Err(PlatoonError::Divergence {
                    residual,
                    iterations: total,
                }
                .into());
            }
            if inner >= par.decay_every {
                alpha = (alpha - par.alpha_decrement).max(par.alpha_floor);
                log::info!(
                    "no convergence after {} iterations: reducing alpha to {}, residual {:.4e}",
                    par.decay_every,
                    alpha,
                    residual
                );
                inner = 0;
            }
            if total > par.iter_ceiling {
                return Err(PlatoonError::IterationCeiling {
                    ceiling: par.iter_ceiling,
                    residual,
                }
                .into());
            }
            if total >= par.iter_budget {
                log::warn!(
                    "stopped by iteration budget after {} iterations, residual {:.4e}",
                    total,
                    residual
                );
                return Ok(ControlSolution {
                    u: u_star.row(0).to_owned(),
                    iterations: total,
                    residual,
                    termination: Termination::BudgetExhausted,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::PlatoonState;
    use crate::params::{CtrParameter, SolverParameter, VehParameter};
    use crate::topology::LeaderTopology;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const DT: f64 = 0.1;
    const V_PLAT: f64 = 20.0;

    fn veh_par() -> VehParameter {
        VehParameter::new(25.0, 4.75, 1.5, 0.2, 7.5, Some(2400.0 / 3600.0), None).unwrap()
    }

    fn equilibrium_reference(veh_par: &VehParameter, s_hor: usize, n_veh: usize) -> Array2<f64> {
        Array2::from_elem((s_hor, n_veh), veh_par.time_gap_eq(V_PLAT))
    }

    #[test]
    fn test_zero_control_leaves_spacing_unchanged() {
        let veh_par = veh_par();
        let topology = LeaderTopology::chain(3);
        let ctr_par = CtrParameter::default();
        let solver_par = SolverParameter::default();
        let reference = equilibrium_reference(&veh_par, 50, 3);
        let state0 = PlatoonState::equilibrium(3, 30.0, V_PLAT);
        let mut solver = HorizonSolver::new(
            DynamicsOrder::Third,
            &state0,
            reference.view(),
            &topology,
            &ctr_par,
            &solver_par,
            veh_par.l_veh,
            veh_par.t_lag,
            DT,
        )
        .unwrap();
        let u = Array2::zeros((50, 3));
        solver.forward_evolution(&u);
        for i in 0..50 {
            for j in 0..3 {
                assert_eq!(solver.state.s[[i, j]], 30.0);
                assert_eq!(solver.state.v[[i, j]], V_PLAT);
                assert_eq!(solver.state.dv[[i, j]], 0.0);
            }
        }
    }

    #[test]
    fn test_single_vehicle_euler_identity_second_order() {
        let veh_par = veh_par();
        let topology = LeaderTopology::chain(1);
        let ctr_par = CtrParameter::default();
        let solver_par = SolverParameter::default();
        let reference = equilibrium_reference(&veh_par, 20, 1);
        let state0 = PlatoonState::equilibrium(1, 30.0, V_PLAT);
        let mut solver = HorizonSolver::new(
            DynamicsOrder::Second,
            &state0,
            reference.view(),
            &topology,
            &ctr_par,
            &solver_par,
            veh_par.l_veh,
            veh_par.t_lag,
            DT,
        )
        .unwrap();
        let u_const = 0.7;
        let u = Array2::from_elem((20, 1), u_const);
        solver.forward_evolution(&u);
        for i in 0..20 {
            let expected = V_PLAT + i as f64 * DT * u_const;
            assert!((solver.state.v[[i, 0]] - expected).abs() < 1e-12);
            // a single vehicle is its own leader, so relative speed never moves
            assert_eq!(solver.state.dv[[i, 0]], 0.0);
        }
    }

    #[test]
    fn test_backward_sweep_on_reference_trajectory_keeps_costates_at_zero() {
        let veh_par = veh_par();
        let topology = LeaderTopology::chain(3);
        let ctr_par = CtrParameter::default();
        let solver_par = SolverParameter::default();
        let reference = equilibrium_reference(&veh_par, 50, 3);
        let s_eq = veh_par.spacing_eq(V_PLAT);
        let state0 = PlatoonState::equilibrium(3, s_eq, V_PLAT);
        let mut solver = HorizonSolver::new(
            DynamicsOrder::Third,
            &state0,
            reference.view(),
            &topology,
            &ctr_par,
            &solver_par,
            veh_par.l_veh,
            veh_par.t_lag,
            DT,
        )
        .unwrap();
        // equilibrium start and zero control hold the trajectory exactly on
        // the reference
        solver.forward_evolution(&Array2::zeros((50, 3)));
        let fresh = solver.backward_evolution();
        for i in 0..50 {
            for j in 0..3 {
                assert!(fresh.ls[[i, j]].abs() < 1e-12);
                assert!(fresh.lv[[i, j]].abs() < 1e-12);
                assert!(fresh.la[[i, j]].abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_equilibrium_platoon_converges_to_zero_control() {
        let veh_par = veh_par();
        let topology = LeaderTopology::chain(3);
        let ctr_par = CtrParameter::default();
        let solver_par = SolverParameter::default();
        let reference = equilibrium_reference(&veh_par, 50, 3);
        let s_eq = veh_par.spacing_eq(V_PLAT);
        let state0 = PlatoonState::equilibrium(3, s_eq, V_PLAT);
        let mut solver = HorizonSolver::new(
            DynamicsOrder::Third,
            &state0,
            reference.view(),
            &topology,
            &ctr_par,
            &solver_par,
            veh_par.l_veh,
            veh_par.t_lag,
            DT,
        )
        .unwrap();
        let solution = solver.compute_control().unwrap();
        assert_eq!(solution.termination, Termination::Converged);
        for &u in solution.u.iter() {
            assert!(u.abs() < 1e-9);
        }
        for i in 0..50 {
            for j in 0..3 {
                assert!((solver.state.s[[i, j]] - s_eq).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_control_effort_only_cost_yields_the_unconstrained_optimum() {
        // with the state weights off, the quadratic cost is minimized by a
        // vanishing command
        let veh_par = veh_par();
        let topology = LeaderTopology::chain(2);
        let ctr_par = CtrParameter {
            c_spc: 0.0,
            c_rel: 0.0,
            ..Default::default()
        };
        let solver_par = SolverParameter::default();
        let reference = equilibrium_reference(&veh_par, 30, 2);
        let state0 = PlatoonState {
            spacing: array![28.0, 33.0],
            speed: array![19.0, 21.0],
            rel_speed: array![0.5, -0.5],
            accel: array![0.1, -0.2],
        };
        let mut solver = HorizonSolver::new(
            DynamicsOrder::Third,
            &state0,
            reference.view(),
            &topology,
            &ctr_par,
            &solver_par,
            veh_par.l_veh,
            veh_par.t_lag,
            DT,
        )
        .unwrap();
        let solution = solver.compute_control().unwrap();
        assert_eq!(solution.termination, Termination::Converged);
        for &u in solution.u.iter() {
            assert!(u.abs() <= solver_par.eps);
        }
    }

    #[test]
    fn test_control_always_respects_actuator_bounds() {
        let veh_par = veh_par();
        let topology = LeaderTopology::chain(4);
        let ctr_par = CtrParameter::default();
        // tight budget: the point is the bound, not convergence
        let solver_par = SolverParameter {
            iter_budget: 60,
            ..Default::default()
        };
        let reference = equilibrium_reference(&veh_par, 50, 4);
        let s_eq = veh_par.spacing_eq(V_PLAT);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..5 {
            let state0 = PlatoonState {
                spacing: Array1::from_iter(
                    (0..4).map(|_| s_eq + rng.gen_range(-5.0..5.0)),
                ),
                speed: Array1::from_iter((0..4).map(|_| V_PLAT + rng.gen_range(-3.0..3.0))),
                rel_speed: Array1::from_iter((0..4).map(|_| rng.gen_range(-1.0..1.0))),
                accel: Array1::from_iter((0..4).map(|_| rng.gen_range(-0.5..0.5))),
            };
            let mut solver = HorizonSolver::new(
                DynamicsOrder::Third,
                &state0,
                reference.view(),
                &topology,
                &ctr_par,
                &solver_par,
                veh_par.l_veh,
                veh_par.t_lag,
                DT,
            )
            .unwrap();
            let solution = solver.compute_control().unwrap();
            for &u in solution.u.iter() {
                assert!(u >= ctr_par.u_min && u <= ctr_par.u_max);
            }
        }
    }

    #[test]
    fn test_iteration_ceiling_surfaces_as_an_error() {
        let veh_par = veh_par();
        let topology = LeaderTopology::chain(2);
        let ctr_par = CtrParameter::default();
        // unreachable eps with ceiling below budget forces the hard stop
        let solver_par = SolverParameter {
            eps: 1e-12,
            iter_ceiling: 10,
            iter_budget: 1_000,
            ..Default::default()
        };
        let reference = equilibrium_reference(&veh_par, 20, 2);
        let state0 = PlatoonState {
            spacing: array![25.0, 35.0],
            speed: array![19.0, 21.0],
            rel_speed: array![1.0, -1.0],
            accel: array![0.0, 0.0],
        };
        let mut solver = HorizonSolver::new(
            DynamicsOrder::Third,
            &state0,
            reference.view(),
            &topology,
            &ctr_par,
            &solver_par,
            veh_par.l_veh,
            veh_par.t_lag,
            DT,
        )
        .unwrap();
        let err = solver.compute_control().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlatoonError>(),
            Some(PlatoonError::IterationCeiling { .. })
        ));
    }

    #[test]
    fn test_budget_stop_returns_best_effort_control() {
        let veh_par = veh_par();
        let topology = LeaderTopology::chain(2);
        let ctr_par = CtrParameter::default();
        let solver_par = SolverParameter {
            eps: 1e-12,
            iter_budget: 10,
            ..Default::default()
        };
        let reference = equilibrium_reference(&veh_par, 20, 2);
        let state0 = PlatoonState {
            spacing: array![25.0, 35.0],
            speed: array![19.0, 21.0],
            rel_speed: array![1.0, -1.0],
            accel: array![0.0, 0.0],
        };
        let mut solver = HorizonSolver::new(
            DynamicsOrder::Third,
            &state0,
            reference.view(),
            &topology,
            &ctr_par,
            &solver_par,
            veh_par.l_veh,
            veh_par.t_lag,
            DT,
        )
        .unwrap();
        let solution = solver.compute_control().unwrap();
        assert_eq!(solution.termination, Termination::BudgetExhausted);
        assert_eq!(solution.iterations, 10);
    }

    #[test]
    fn test_external_head_control_drives_relative_speed() {
        let veh_par = veh_par();
        let topology = LeaderTopology::chain(2);
        let ctr_par = CtrParameter::default();
        let solver_par = SolverParameter::default();
        let reference = equilibrium_reference(&veh_par, 10, 2);
        let state0 = PlatoonState::equilibrium(2, 30.0, V_PLAT);
        let mut u_ext = Array2::zeros((10, 2));
        u_ext.column_mut(0).fill(0.5);
        let mut solver = HorizonSolver::new(
            DynamicsOrder::Second,
            &state0,
            reference.view(),
            &topology,
            &ctr_par,
            &solver_par,
            veh_par.l_veh,
            veh_par.t_lag,
            DT,
        )
        .unwrap()
        .with_external_control(u_ext)
        .unwrap();
        solver.forward_evolution(&Array2::zeros((10, 2)));
        for i in 0..10 {
            // the head integrates the imposed acceleration, the follower
            // sees none of it
            assert!((solver.state.dv[[i, 0]] - i as f64 * DT * 0.5).abs() < 1e-12);
            assert_eq!(solver.state.dv[[i, 1]], 0.0);
        }
    }

    #[test]
    fn test_second_order_shared_leadership_offsets_through_the_chain() {
        // a uniform costate gives a uniform command, so the leader/follower
        // command difference vanishes and relative speed stays put
        let veh_par = veh_par();
        let topology = LeaderTopology::chain(3);
        let ctr_par = CtrParameter::default();
        let solver_par = SolverParameter::default();
        let reference = equilibrium_reference(&veh_par, 20, 3);
        let state0 = PlatoonState::equilibrium(3, 30.0, V_PLAT);
        let mut solver = HorizonSolver::new(
            DynamicsOrder::Second,
            &state0,
            reference.view(),
            &topology,
            &ctr_par,
            &solver_par,
            veh_par.l_veh,
            veh_par.t_lag,
            DT,
        )
        .unwrap();
        let u = Array2::from_elem((20, 3), 0.8);
        solver.forward_evolution(&u);
        for i in 0..20 {
            for j in 0..3 {
                assert_eq!(solver.state.dv[[i, j]], 0.0);
            }
        }
    }
}
