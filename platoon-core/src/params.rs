//! Module containing traffic-flow, simulation, control, and solver-tuning
//! parameter structs.
//!
//! Naming follows the operational-layer conventions:
//!
//! Capacity:           cpcty
//! Congestion wave:    w_cgt
//! Free flow speed:    u_ffs
//! Critical density:   k_crt
//! Maximum density:    k_max
//! Space displ:        x_dsp
//! Time displacement:  t_dsp

use crate::imports::*;

/// Default congestion wave speed, m/s, used when neither capacity nor wave
/// speed is supplied
pub const W_CGT_DEFAULT: f64 = 6.25;
/// Default capacity flow, veh/s
pub const CPCTY_DEFAULT: f64 = 0.8;
/// Default free-flow speed, m/s
pub const U_FFS_DEFAULT: f64 = 25.0;
/// Default vehicle length, m
pub const L_VEH_DEFAULT: f64 = 4.5;
/// Default standstill space gap, m
pub const X_GAP_DEFAULT: f64 = 1.75;
/// Default actuation lag, s
pub const T_LAG_DEFAULT: f64 = 0.2;
/// Default relaxation speed drop, m/s
pub const V_DRP_DEFAULT: f64 = 25.0 * 0.3;

/// Vehicle and fundamental-diagram parameters.
///
/// Any two of {capacity, wave speed} plus free-flow speed and geometry fix the
/// remaining quantities.  Derivation happens once in [`VehParameter::derive`]
/// and the struct is treated as immutable afterward; the consistency invariant
/// `cpcty * t_dsp == u_ffs / (w_cgt + u_ffs)` holds for every constructed
/// value.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VehParameter {
    /// free-flow speed, m/s
    pub u_ffs: f64,
    /// vehicle length, m
    pub l_veh: f64,
    /// standstill space gap to the leader, m
    pub x_gap: f64,
    /// actuation lag of the drivetrain, s
    pub t_lag: f64,
    /// speed drop available for relaxation maneuvers, m/s
    pub v_drp: f64,
    /// capacity flow, veh/s; derived from the wave speed when absent
    #[serde(default)]
    pub cpcty: Option<f64>,
    /// congestion wave speed, m/s; derived from capacity when absent
    #[serde(default)]
    pub w_cgt: Option<f64>,
    /// critical density, veh/m
    #[serde(skip)]
    pub k_crt: f64,
    /// maximum (jam) density, veh/m
    #[serde(skip)]
    pub k_max: f64,
    /// space displacement (jam spacing), m
    #[serde(skip)]
    pub x_dsp: f64,
    /// time displacement, s
    #[serde(skip)]
    pub t_dsp: f64,
}

impl VehParameter {
    pub fn new(
        u_ffs: f64,
        l_veh: f64,
        x_gap: f64,
        t_lag: f64,
        v_drp: f64,
        cpcty: Option<f64>,
        w_cgt: Option<f64>,
    ) -> anyhow::Result<Self> {
        let mut veh_par = Self {
            u_ffs,
            l_veh,
            x_gap,
            t_lag,
            v_drp,
            cpcty,
            w_cgt,
            k_crt: 0.0,
            k_max: 0.0,
            x_dsp: 0.0,
            t_dsp: 0.0,
        };
        veh_par.derive()?;
        Ok(veh_par)
    }

    /// Construct from the fundamental-diagram triple the micro-simulator
    /// hands out: free-flow speed, jam density, and wave speed.
    pub fn from_fundamental(
        u_ffs: f64,
        k_max: f64,
        w_cgt: f64,
        l_veh: f64,
        t_lag: f64,
        v_drp: f64,
    ) -> anyhow::Result<Self> {
        ensure!(k_max > 0.0, format_dbg!(k_max));
        let x_gap = 1.0 / k_max - l_veh;
        Self::new(u_ffs, l_veh, x_gap, t_lag, v_drp, None, Some(w_cgt))
    }

    /// Complete the parameter set.
    ///
    /// Capacity, when supplied, wins and fixes the wave speed; otherwise the
    /// wave speed (supplied or defaulted) fixes capacity.
    pub fn derive(&mut self) -> anyhow::Result<()> {
        ensure!(self.u_ffs > 0.0, format_dbg!(self.u_ffs));
        ensure!(self.l_veh > 0.0, format_dbg!(self.l_veh));
        ensure!(self.x_gap > 0.0, format_dbg!(self.x_gap));
        ensure!(self.t_lag > 0.0, format_dbg!(self.t_lag));
        ensure!(self.v_drp > 0.0, format_dbg!(self.v_drp));

        self.x_dsp = self.l_veh + self.x_gap;
        self.k_max = 1.0 / self.x_dsp;

        match (self.cpcty, self.w_cgt) {
            (Some(cpcty), _) => {
                self.k_crt = cpcty / self.u_ffs;
                let w_cgt = cpcty / (self.k_max - self.k_crt);
                if !w_cgt.is_finite() || w_cgt <= 0.0 {
                    return Err(PlatoonError::Configuration(format!(
                        "capacity {} veh/s is not reachable below jam density {} veh/m at {} m/s",
                        cpcty, self.k_max, self.u_ffs
                    ))
                    .into());
                }
                self.w_cgt = Some(w_cgt);
            }
            (None, w_cgt) => {
                let w_cgt = w_cgt.unwrap_or_else(|| {
                    log::warn!(
                        "no capacity or congestion wave speed provided; using default wave speed {} m/s",
                        W_CGT_DEFAULT
                    );
                    W_CGT_DEFAULT
                });
                if !w_cgt.is_finite() || w_cgt <= 0.0 {
                    return Err(PlatoonError::Configuration(format!(
                        "congestion wave speed must be positive, got {w_cgt}"
                    ))
                    .into());
                }
                self.w_cgt = Some(w_cgt);
                let cpcty = w_cgt * self.u_ffs / (w_cgt + self.u_ffs) * self.k_max;
                self.cpcty = Some(cpcty);
                self.k_crt = cpcty / self.u_ffs;
            }
        }
        // unwrap is ok from here on: both branches above leave `cpcty` and
        // `w_cgt` populated
        self.t_dsp = 1.0 / (self.k_max * self.w_cgt.unwrap());
        Ok(())
    }

    /// Density sustaining capacity flow at cruise speed `v`, veh/m
    pub fn density_at(&self, v: f64) -> f64 {
        self.cpcty.unwrap() / v
    }

    /// Equilibrium net gap behind the leader at cruise speed `v`, m
    pub fn gap_eq(&self, v: f64) -> f64 {
        1.0 / self.density_at(v) - self.l_veh
    }

    /// Equilibrium time gap at cruise speed `v`, s
    pub fn time_gap_eq(&self, v: f64) -> f64 {
        self.gap_eq(v) / v
    }

    /// Equilibrium front-to-front spacing at cruise speed `v`, m
    pub fn spacing_eq(&self, v: f64) -> f64 {
        self.gap_eq(v) + self.l_veh
    }
}

impl Default for VehParameter {
    fn default() -> Self {
        // the default set is always derivable
        Self::new(
            U_FFS_DEFAULT,
            L_VEH_DEFAULT,
            X_GAP_DEFAULT,
            T_LAG_DEFAULT,
            V_DRP_DEFAULT,
            Some(CPCTY_DEFAULT),
            None,
        )
        .unwrap()
    }
}

impl SerdeAPI for VehParameter {
    fn init(&mut self) -> anyhow::Result<()> {
        self.derive()
    }
}

/// Simulation timing parameters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SimParameter {
    /// integration step size, s
    pub t_stp: f64,
    /// prediction horizon, s
    pub t_hor: f64,
    /// total simulated duration, s
    pub t_sim: f64,
}

impl SimParameter {
    pub fn new(t_stp: f64, t_hor: f64, t_sim: f64) -> anyhow::Result<Self> {
        let mut sim_par = Self {
            t_stp,
            t_hor,
            t_sim,
        };
        sim_par.init()?;
        Ok(sim_par)
    }

    /// Number of samples in one prediction horizon
    pub fn s_hor(&self) -> usize {
        (self.t_hor / self.t_stp).round() as usize
    }

    /// Number of samples in the full simulation
    pub fn n_samples(&self) -> usize {
        (self.t_sim / self.t_stp).round() as usize
    }

    /// Sample times `0, t_stp, 2*t_stp, ...` over the full simulation
    pub fn time_vector(&self) -> Array1<f64> {
        crate::utils::time_vector(self.n_samples(), self.t_stp)
    }
}

impl Default for SimParameter {
    fn default() -> Self {
        Self {
            t_stp: 0.1,
            t_hor: 5.0,
            t_sim: 60.0,
        }
    }
}

impl SerdeAPI for SimParameter {
    fn init(&mut self) -> anyhow::Result<()> {
        ensure!(self.t_stp > 0.0, format_dbg!(self.t_stp));
        ensure!(self.t_hor > 0.0, format_dbg!(self.t_hor));
        ensure!(self.t_sim > 0.0, format_dbg!(self.t_sim));
        ensure!(self.s_hor() >= 2, format_dbg!(self.s_hor()));
        ensure!(self.t_hor <= self.t_sim, format_dbg!(self.t_hor));
        Ok(())
    }
}

/// Quadratic cost weights and actuator bounds.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CtrParameter {
    /// weight on the spacing error
    pub c_spc: f64,
    /// weight on the relative speed
    pub c_rel: f64,
    /// weight on the control effort
    pub c_ctr: f64,
    /// minimum acceleration command, m/s^2
    pub u_min: f64,
    /// maximum acceleration command, m/s^2
    pub u_max: f64,
}

impl Default for CtrParameter {
    fn default() -> Self {
        Self {
            c_spc: 0.1,
            c_rel: 1.0,
            c_ctr: 0.5,
            u_min: -1.5,
            u_max: 1.5,
        }
    }
}

impl SerdeAPI for CtrParameter {
    fn init(&mut self) -> anyhow::Result<()> {
        ensure!(self.u_min < self.u_max, format_dbg!(self.u_min));
        ensure!(self.c_spc >= 0.0, format_dbg!(self.c_spc));
        ensure!(self.c_rel >= 0.0, format_dbg!(self.c_rel));
        ensure!(self.c_ctr > 0.0, format_dbg!(self.c_ctr));
        Ok(())
    }
}

/// Tuning of the damped fixed-point sweep.
///
/// Defaults follow the lagged-actuator platoon runs; [`Self::reduced_order`]
/// matches the tighter cadence used with the second-order model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SolverParameter {
    /// initial damping factor for the costate blend
    pub alpha_0: f64,
    /// convergence threshold on the costate residual
    pub eps: f64,
    /// residual above which the sweep is declared divergent
    pub div_threshold: f64,
    /// inner iterations between damping decays
    pub decay_every: usize,
    /// amount removed from alpha at each decay
    pub alpha_decrement: f64,
    /// smallest damping factor the decay may reach
    pub alpha_floor: f64,
    /// hard ceiling on total iterations; crossing it is a failure
    pub iter_ceiling: usize,
    /// soft iteration budget; exhausting it returns the best control so far
    pub iter_budget: usize,
}

impl SolverParameter {
    pub fn reduced_order() -> Self {
        Self {
            alpha_0: 0.01,
            decay_every: 500,
            iter_ceiling: 10_000,
            iter_budget: 100_000,
            ..Default::default()
        }
    }
}

impl Default for SolverParameter {
    fn default() -> Self {
        Self {
            alpha_0: 0.02,
            eps: 0.1,
            div_threshold: 1e6,
            decay_every: 5_000,
            alpha_decrement: 0.01,
            alpha_floor: 0.01,
            iter_ceiling: 20_000,
            iter_budget: 10_000,
        }
    }
}

impl SerdeAPI for SolverParameter {
    fn init(&mut self) -> anyhow::Result<()> {
        ensure!(self.alpha_0 > 0.0 && self.alpha_0 <= 1.0, format_dbg!(self.alpha_0));
        ensure!(self.eps > 0.0, format_dbg!(self.eps));
        ensure!(self.div_threshold > self.eps, format_dbg!(self.div_threshold));
        ensure!(self.decay_every > 0, format_dbg!(self.decay_every));
        ensure!(self.alpha_floor > 0.0, format_dbg!(self.alpha_floor));
        ensure!(self.iter_budget > 0, format_dbg!(self.iter_budget));
        Ok(())
    }
}
