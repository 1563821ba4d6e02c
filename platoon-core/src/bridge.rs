//! Module containing the flat record exchange with the external traffic
//! micro-simulator.
//!
//! The core never calls the engine; it only consumes and produces these
//! per-step vehicle records.  Spacing and leader speed are reconstructed
//! from position snapshots here, with a documented degradation when a
//! leader has already left the network.

use std::collections::HashMap;

use crate::imports::*;

/// Merge-zone boundaries on the test network, m
pub const MERGE_ZONE_BEGIN: f64 = 0.0;
pub const MERGE_ZONE_END: f64 = 100.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum VehKind {
    #[serde(rename = "CAV")]
    Cav,
    #[serde(rename = "HDV")]
    Hdv,
}

/// One per-step vehicle record on the simulator wire format.  Field names
/// follow the engine's trajectory export.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VehRecord {
    /// sample time, s
    pub ti: f64,
    /// vehicle id
    pub id: u64,
    /// vehicle kind
    #[serde(rename = "type")]
    pub kind: VehKind,
    /// road link
    pub tron: String,
    /// lane on the link
    pub voie: u32,
    /// distance traveled on the current link, m
    pub dst: f64,
    /// absolute curvilinear position, m
    pub abs: f64,
    /// speed, m/s
    pub vit: f64,
    /// id of the immediate leader; own id when self-led
    pub ldr: u64,
    /// front-to-front spacing to the leader, m
    #[serde(default)]
    pub spc: Option<f64>,
    /// leader speed, m/s
    #[serde(default)]
    pub vld: Option<f64>,
}

/// Equilibrium spacing per vehicle kind, used for self-led vehicles
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EquilibriumSpacing {
    pub cav: f64,
    pub hdv: f64,
}

impl EquilibriumSpacing {
    pub fn for_kind(&self, kind: VehKind) -> f64 {
        match kind {
            VehKind::Cav => self.cav,
            VehKind::Hdv => self.hdv,
        }
    }
}

/// Reconstruct the spacing of every record in a same-instant snapshot.
///
/// A self-led vehicle gets its equilibrium spacing; a vehicle whose leader is
/// absent from the snapshot gets a zero gap stand-in rather than an error.
pub fn fill_spacing(snapshot: &mut [VehRecord], eq: &EquilibriumSpacing) {
    let positions: HashMap<u64, f64> = snapshot.iter().map(|r| (r.id, r.abs)).collect();
    for record in snapshot.iter_mut() {
        record.spc = Some(if record.ldr == record.id {
            eq.for_kind(record.kind)
        } else if let Some(&ldr_abs) = positions.get(&record.ldr) {
            ldr_abs - record.abs
        } else {
            log::debug!(
                "leader {} of vehicle {} out of the network; zero gap stand-in",
                record.ldr,
                record.id
            );
            0.0
        });
    }
}

/// Reconstruct the leader speed of every record in a same-instant snapshot.
///
/// Self-led vehicles and vehicles whose leader has left the network carry
/// their own speed as the stand-in leader signal.
pub fn fill_leader_speed(snapshot: &mut [VehRecord]) {
    let speeds: HashMap<u64, f64> = snapshot.iter().map(|r| (r.id, r.vit)).collect();
    for record in snapshot.iter_mut() {
        record.vld = Some(if record.ldr == record.id {
            record.vit
        } else {
            *speeds.get(&record.ldr).unwrap_or(&record.vit)
        });
    }
}

/// Link and lane of a vehicle from its absolute position
pub fn assign_link(abs: f64) -> (&'static str, u32) {
    if abs <= MERGE_ZONE_BEGIN {
        ("In_main", 1)
    } else if abs <= MERGE_ZONE_END {
        ("Merge_zone", 2)
    } else {
        ("Out_main", 1)
    }
}

/// Read a record table written by the engine bridge
pub fn read_records<P: AsRef<Path>>(filepath: P) -> anyhow::Result<Vec<VehRecord>> {
    let filepath = filepath.as_ref();
    let mut rdr = csv::Reader::from_path(filepath)
        .with_context(|| format!("Could not open record file: {filepath:?}"))?;
    let mut records = Vec::new();
    for record in rdr.deserialize() {
        records.push(record?);
    }
    Ok(records)
}

/// Write a record table for the engine bridge
pub fn write_records<P: AsRef<Path>>(filepath: P, records: &[VehRecord]) -> anyhow::Result<()> {
    let filepath = filepath.as_ref();
    let mut wtr = csv::Writer::from_path(filepath)
        .with_context(|| format!("Could not create record file: {filepath:?}"))?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}
