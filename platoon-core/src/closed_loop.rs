//! Module containing the receding-horizon closed-loop driver.
//!
//! At every simulation step the horizon problem is re-solved on a local
//! reference window and only the first computed control is applied to the
//! true plant.  Robustness switches (measurement noise, measurement delay,
//! actuation-lag mismatch) perturb what the controller sees, never the plant
//! itself.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::imports::*;
use crate::mpc::{DynamicsOrder, HorizonSolver, PlatoonState};
use crate::params::{CtrParameter, SimParameter, SolverParameter, VehParameter};
use crate::reference::{GapEvent, ReferenceTrajectory};
use crate::topology::LeaderTopology;

/// Extra lag the controller models under a mismatch run, s
pub const LAG_MISMATCH_OFFSET: f64 = 0.1;

fn default_tag() -> String {
    "run".to_string()
}

/// Full description of one closed-loop experiment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    /// platoon length, vehicles
    pub n_veh: usize,
    /// platoon cruise speed, m/s
    pub v_plat: f64,
    #[serde(default)]
    pub veh_par: VehParameter,
    #[serde(default)]
    pub sim_par: SimParameter,
    #[serde(default)]
    pub ctr_par: CtrParameter,
    #[serde(default)]
    pub solver_par: SolverParameter,
    #[serde(default)]
    pub order: DynamicsOrder,
    /// scheduled gap maneuvers; the first event's robustness switches govern
    /// the whole run
    #[serde(default)]
    pub events: Vec<GapEvent>,
    /// seed for the measurement-noise draws
    #[serde(default)]
    pub seed: u64,
    /// suffix for exported table names
    #[serde(default = "default_tag")]
    pub tag: String,
}

impl SerdeAPI for Scenario {
    fn init(&mut self) -> anyhow::Result<()> {
        ensure!(self.n_veh > 0, format_dbg!(self.n_veh));
        ensure!(self.v_plat > 0.0, format_dbg!(self.v_plat));
        self.veh_par.init()?;
        self.sim_par.init()?;
        self.ctr_par.init()?;
        self.solver_par.init()?;
        Ok(())
    }
}

/// Robustness switches collapsed from the event schedule.
#[derive(Clone, Debug, Default, PartialEq)]
struct Perturbation {
    noise_w: Option<f64>,
    delay: Option<usize>,
    lag_mismatch: bool,
    lag_override: Option<f64>,
}

impl Perturbation {
    fn from_events(events: &[GapEvent]) -> Self {
        match events.first() {
            Some(event) => Self {
                noise_w: event.noise.then_some(event.noise_w),
                delay: event.delay.then_some(event.delay_steps),
                lag_mismatch: event.model_mismatch,
                lag_override: event.lag,
            },
            None => Self::default(),
        }
    }
}

/// Output tables of one closed-loop run, `[n_samples x n_veh]` each.
#[derive(Clone, Debug, PartialEq)]
pub struct ClosedLoopResults {
    pub spacing: Array2<f64>,
    pub speed: Array2<f64>,
    pub rel_speed: Array2<f64>,
    pub accel: Array2<f64>,
    /// desired spacing rebuilt from the reference time gap
    pub desired_spacing: Array2<f64>,
    pub control: Array2<f64>,
    pub position: Array2<f64>,
    /// fixed-point iterations spent at each step
    pub iterations: Vec<usize>,
}

impl ClosedLoopResults {
    pub fn n_samples(&self) -> usize {
        self.spacing.nrows()
    }

    pub fn n_veh(&self) -> usize {
        self.spacing.ncols()
    }
}

/// Receding-horizon driver: owns the scenario, the chain topology, and the
/// full-length reference.
pub struct ClosedLoop {
    pub scenario: Scenario,
    pub topology: LeaderTopology,
    pub reference: ReferenceTrajectory,
}

impl ClosedLoop {
    pub fn new(mut scenario: Scenario) -> anyhow::Result<Self> {
        scenario.init()?;
        let topology = LeaderTopology::chain(scenario.n_veh);
        let reference = ReferenceTrajectory::build(
            &scenario.events,
            &scenario.veh_par,
            &scenario.ctr_par,
            &scenario.sim_par,
            scenario.v_plat,
            scenario.n_veh,
        )?;
        Ok(Self {
            scenario,
            topology,
            reference,
        })
    }

    /// Walk the whole simulated duration, re-solving the horizon problem at
    /// each step.  A solver fatal (divergence, iteration ceiling) aborts the
    /// run and surfaces to the caller.
    pub fn run(&self) -> anyhow::Result<ClosedLoopResults> {
        let scenario = &self.scenario;
        let n_veh = scenario.n_veh;
        let n_samples = scenario.sim_par.n_samples();
        let s_hor = scenario.sim_par.s_hor();
        let dt = scenario.sim_par.t_stp;
        let perturbation = Perturbation::from_events(&scenario.events);

        let plant_lag = perturbation.lag_override.unwrap_or(scenario.veh_par.t_lag);
        let model_lag = if perturbation.lag_mismatch {
            plant_lag + LAG_MISMATCH_OFFSET
        } else {
            plant_lag
        };

        let s_eq = scenario.veh_par.spacing_eq(scenario.v_plat);
        let mut spacing = Array2::zeros((n_samples, n_veh));
        let mut speed = Array2::zeros((n_samples, n_veh));
        let mut rel_speed = Array2::<f64>::zeros((n_samples, n_veh));
        let mut accel = Array2::<f64>::zeros((n_samples, n_veh));
        let mut control = Array2::<f64>::zeros((n_samples, n_veh));
        let mut position = Array2::<f64>::zeros((n_samples, n_veh));
        spacing.row_mut(0).fill(s_eq);
        speed.row_mut(0).fill(scenario.v_plat);
        for j in 0..n_veh {
            // head vehicle at the front, followers staggered behind
            position[[0, j]] = (n_veh - 1 - j) as f64 * s_eq;
        }

        let mut rng = StdRng::seed_from_u64(scenario.seed);
        let mut iterations = Vec::with_capacity(n_samples - 1);

        for i in 0..n_samples - 1 {
            let window = self.reference.window(i, s_hor);

            // measured state, optionally read with a fixed extra delay
            let k = perturbation.delay.map_or(i, |d| i.saturating_sub(d));
            let mut state0 = PlatoonState {
                spacing: spacing.row(k).to_owned(),
                speed: speed.row(k).to_owned(),
                rel_speed: rel_speed.row(k).to_owned(),
                accel: accel.row(k).to_owned(),
            };
            if let Some(w) = perturbation.noise_w {
                state0
                    .spacing
                    .mapv_inplace(|s| s + w * rng.gen::<f64>());
            }

            let mut solver = HorizonSolver::new(
                scenario.order,
                &state0,
                window,
                &self.topology,
                &scenario.ctr_par,
                &scenario.solver_par,
                scenario.veh_par.l_veh,
                model_lag,
                dt,
            )?;
            let solution = solver.compute_control()?;
            iterations.push(solution.iterations);
            let u = solution.u;

            // advance the true plant one explicit Euler step with the first
            // computed control
            for j in 0..n_veh {
                spacing[[i + 1, j]] = spacing[[i, j]] + dt * rel_speed[[i, j]];
                match scenario.order {
                    DynamicsOrder::Third => {
                        let da = match self.topology.leader(j) {
                            Some(ldr) => accel[[i, ldr]] - accel[[i, j]],
                            None => 0.0,
                        };
                        rel_speed[[i + 1, j]] = rel_speed[[i, j]] + dt * da;
                        speed[[i + 1, j]] = speed[[i, j]] + dt * accel[[i, j]];
                        accel[[i + 1, j]] =
                            (1.0 - dt / plant_lag) * accel[[i, j]] + dt / plant_lag * u[j];
                    }
                    DynamicsOrder::Second => {
                        let du = u[self.topology.leader_or_self(j)] - u[j];
                        rel_speed[[i + 1, j]] = rel_speed[[i, j]] + dt * du;
                        speed[[i + 1, j]] = speed[[i, j]] + dt * u[j];
                    }
                }
                control[[i, j]] = u[j];
                position[[i + 1, j]] =
                    position[[i, j]] + speed[[i, j]] * dt + 0.5 * u[j] * dt * dt;
            }
        }

        let desired_spacing = self
            .reference
            .desired_spacing(scenario.v_plat, scenario.veh_par.l_veh);

        Ok(ClosedLoopResults {
            spacing,
            speed,
            rel_speed,
            accel,
            desired_spacing,
            control,
            position,
            iterations,
        })
    }
}
