//! Module containing the tactical reference generator.
//!
//! Gap-change maneuvers are scheduled as [`GapEvent`] records; each one turns
//! into a logistic transition of the affected vehicle's target time gap,
//! timed so the transition completes at the merge instant given the actuator
//! limits.  Vehicles without an event track the equilibrium time gap.

use crate::imports::*;
use crate::params::{CtrParameter, SimParameter, VehParameter};

/// One scheduled gap-change maneuver, plus the robustness switches of the
/// run it belongs to.  The perturbation flags of the first event of a
/// schedule govern the whole closed-loop run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GapEvent {
    /// index of the vehicle opening (or closing) its gap
    pub veh: usize,
    /// merge time, s, at which the new gap must be available
    pub t_merge: f64,
    /// initial and final target time gap, s
    pub headway: (f64, f64),
    /// perturb measured spacing with iid noise
    #[serde(default)]
    pub noise: bool,
    /// uniform noise magnitude, m
    #[serde(default)]
    pub noise_w: f64,
    /// controller models a lag offset from the true plant
    #[serde(default)]
    pub model_mismatch: bool,
    /// override of the true actuation lag, s
    #[serde(default)]
    pub lag: Option<f64>,
    /// read the state with a fixed extra measurement delay
    #[serde(default)]
    pub delay: bool,
    /// measurement delay, in steps
    #[serde(default)]
    pub delay_steps: usize,
}

impl SerdeAPI for GapEvent {}

/// Anticipation time needed to complete a gap transition `tau0 -> tauf`
/// given the actuator bounds and the relaxation speed drop.
///
/// The pair is ordered ascending first; the transition direction does not
/// change how long it takes.
pub fn anticipation_time(
    veh_par: &VehParameter,
    ctr_par: &CtrParameter,
    v_plat: f64,
    tau0: f64,
    tauf: f64,
) -> f64 {
    let (tau0, tauf) = if tau0 > tauf {
        (tauf, tau0)
    } else {
        (tau0, tauf)
    };
    // unwrap ok: w_cgt is always populated after `derive`
    let w_cgt = veh_par.w_cgt.unwrap();
    veh_par.v_drp / 2.0 * (ctr_par.u_min - ctr_par.u_max) / (ctr_par.u_min * ctr_par.u_max)
        + (v_plat + w_cgt) / veh_par.v_drp * (tauf - tau0)
}

/// Per-vehicle target time gap over the full simulated duration,
/// `[n_samples x n_veh]`.  Immutable once built for a given event set.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReferenceTrajectory {
    /// target time gap, s, indexed `[time_step][vehicle]`
    pub tau: Array2<f64>,
    /// equilibrium time gap held by unaffected vehicles, s
    pub tau_eq: f64,
}

impl ReferenceTrajectory {
    pub fn build(
        events: &[GapEvent],
        veh_par: &VehParameter,
        ctr_par: &CtrParameter,
        sim_par: &SimParameter,
        v_plat: f64,
        n_veh: usize,
    ) -> anyhow::Result<Self> {
        ensure!(n_veh > 0, format_dbg!(n_veh));
        ensure!(v_plat > 0.0, format_dbg!(v_plat));
        let tau_eq = veh_par.time_gap_eq(v_plat);
        let time = sim_par.time_vector();
        let mut tau = Array2::from_elem((sim_par.n_samples(), n_veh), tau_eq);

        for event in events {
            ensure!(
                event.veh < n_veh,
                "event vehicle {} outside platoon of {}",
                event.veh,
                n_veh
            );
            let (tau0, tauf) = event.headway;
            ensure!(tau0 > 0.0 && tauf > 0.0, format_dbg!(event.headway));
            let t_ant = anticipation_time(veh_par, ctr_par, v_plat, tau0, tauf);
            ensure!(t_ant > 0.0, format_dbg!(t_ant));
            let t_yld = event.t_merge - t_ant;
            log::info!("anticipation time: {t_ant:.3} s");
            log::info!("yielding time: {t_yld:.3} s");

            // logistic transition centered halfway through the anticipation
            // window, rise time matched to it
            let center = t_yld + t_ant / 2.0;
            for (k, &t) in time.iter().enumerate() {
                let z = 8.0 * (t - center) / t_ant;
                tau[[k, event.veh]] = tau0 + (tauf - tau0) / (1.0 + (-z).exp());
            }
        }
        Ok(Self { tau, tau_eq })
    }

    pub fn n_samples(&self) -> usize {
        self.tau.nrows()
    }

    pub fn n_veh(&self) -> usize {
        self.tau.ncols()
    }

    /// Horizon window `[i, i+s_hor)`, clipped to the trajectory length
    pub fn window(&self, i: usize, s_hor: usize) -> ArrayView2<f64> {
        let end = (i + s_hor).min(self.n_samples());
        self.tau.slice(s![i..end, ..])
    }

    /// Desired front-to-front spacing table `tau * v + l_veh`
    pub fn desired_spacing(&self, v_plat: f64, l_veh: f64) -> Array2<f64> {
        self.tau.mapv(|tau| tau * v_plat + l_veh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (VehParameter, CtrParameter, SimParameter, f64) {
        let veh_par = VehParameter::new(
            25.0,
            4.75,
            1.5,
            0.2,
            7.5,
            Some(2400.0 / 3600.0),
            None,
        )
        .unwrap();
        (veh_par, CtrParameter::default(), SimParameter::new(0.1, 5.0, 90.0).unwrap(), 20.0)
    }

    fn opening_event(veh_par: &VehParameter, v_plat: f64) -> GapEvent {
        let g_t = veh_par.time_gap_eq(v_plat);
        GapEvent {
            veh: 1,
            t_merge: 30.0,
            headway: (g_t, 2.0 * g_t),
            noise: false,
            noise_w: 0.0,
            model_mismatch: false,
            lag: None,
            delay: false,
            delay_steps: 0,
        }
    }

    #[test]
    fn test_opening_reference_rises_monotonically() {
        let (veh_par, ctr_par, sim_par, v_plat) = fixture();
        let event = opening_event(&veh_par, v_plat);
        let reference =
            ReferenceTrajectory::build(&[event], &veh_par, &ctr_par, &sim_par, v_plat, 3)
                .unwrap();
        let column = reference.tau.column(1);
        for k in 1..column.len() {
            assert!(column[k] >= column[k - 1] - 1e-12);
        }
    }

    #[test]
    fn test_reference_settles_by_merge_plus_half_anticipation() {
        let (veh_par, ctr_par, sim_par, v_plat) = fixture();
        let event = opening_event(&veh_par, v_plat);
        let (tau0, tauf) = event.headway;
        let t_ant = anticipation_time(&veh_par, &ctr_par, v_plat, tau0, tauf);
        let reference =
            ReferenceTrajectory::build(&[event.clone()], &veh_par, &ctr_par, &sim_par, v_plat, 3)
                .unwrap();
        let k_settle = ((event.t_merge + t_ant / 2.0) / sim_par.t_stp).ceil() as usize;
        let tol = 1e-3 * (tauf - tau0);
        for k in k_settle..reference.n_samples() {
            assert!((reference.tau[[k, 1]] - tauf).abs() <= tol);
        }
    }

    #[test]
    fn test_unaffected_vehicles_hold_equilibrium_gap() {
        let (veh_par, ctr_par, sim_par, v_plat) = fixture();
        let event = opening_event(&veh_par, v_plat);
        let reference =
            ReferenceTrajectory::build(&[event], &veh_par, &ctr_par, &sim_par, v_plat, 3)
                .unwrap();
        for &veh in &[0usize, 2] {
            for k in 0..reference.n_samples() {
                assert_eq!(reference.tau[[k, veh]], reference.tau_eq);
            }
        }
    }

    #[test]
    fn test_event_outside_platoon_is_rejected() {
        let (veh_par, ctr_par, sim_par, v_plat) = fixture();
        let mut event = opening_event(&veh_par, v_plat);
        event.veh = 9;
        assert!(
            ReferenceTrajectory::build(&[event], &veh_par, &ctr_par, &sim_par, v_plat, 3)
                .is_err()
        );
    }

    #[test]
    fn test_window_is_clipped_at_the_trajectory_end() {
        let (veh_par, ctr_par, sim_par, v_plat) = fixture();
        let reference =
            ReferenceTrajectory::build(&[], &veh_par, &ctr_par, &sim_par, v_plat, 2).unwrap();
        let n = reference.n_samples();
        assert_eq!(reference.window(0, 50).nrows(), 50);
        assert_eq!(reference.window(n - 10, 50).nrows(), 10);
    }
}
