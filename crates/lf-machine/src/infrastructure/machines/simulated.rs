//! A deterministic stand-in for real machine controllers.
//!
//! Each poll advances an internal tick and derives every reading from it, so
//! two simulated machines with the same kind produce the same sequence of
//! snapshots.  The Haas profile reports the fields the shop-floor Haas mill
//! exposes through its Q600 macro variables; the lathe profile reports the
//! two-axis subset a CNC lathe has.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Number, Value};

use crate::domain::machine::{MachineData, MachineError, MachineInterface};

/// Which reading profile a machine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineKind {
    /// Five-axis vertical mill.
    #[default]
    Haas,
    /// Two-axis CNC lathe.
    CncLathe,
}

pub struct SimulatedMachine {
    name: String,
    kind: MachineKind,
    tick: AtomicU64,
}

impl SimulatedMachine {
    pub fn new(name: impl Into<String>, kind: MachineKind) -> Self {
        Self {
            name: name.into(),
            kind,
            tick: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> MachineKind {
        self.kind
    }

    fn readings(&self, tick: u64) -> Result<MachineData, MachineError> {
        let phase = (tick % 100) as f64;
        let spindle_speed = 1200 + (tick % 10) * 50;
        let coolant_level = 100.0 - (tick % 50) as f64 * 0.5;

        let mut data = MachineData::new();
        data.insert("tick".into(), json!(tick));
        data.insert("spindle_speed".into(), json!(spindle_speed));
        data.insert("coolant_level".into(), float_reading("coolant_level", coolant_level)?);

        match self.kind {
            MachineKind::Haas => {
                for (axis, scale) in [("x", 1.0), ("y", 0.5), ("z", -0.25), ("a", 3.6), ("b", 1.8)] {
                    let machine = phase * scale;
                    let (machine_key, work_key) = (format!("machine_coord_{axis}"), format!("work_coord_{axis}"));
                    data.insert(machine_key.clone(), float_reading(&machine_key, machine)?);
                    data.insert(work_key.clone(), float_reading(&work_key, machine - 10.0 * scale)?);
                }
            }
            MachineKind::CncLathe => {
                data.insert("machine_coord_x".into(), float_reading("machine_coord_x", phase * 0.2)?);
                data.insert("machine_coord_z".into(), float_reading("machine_coord_z", -phase)?);
            }
        }
        Ok(data)
    }
}

/// JSON has no NaN or infinity, so a non-finite reading is malformed.
fn float_reading(field: &str, value: f64) -> Result<Value, MachineError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| MachineError::MalformedReading {
            field: field.into(),
            detail: format!("{value} is not a finite number"),
        })
}

#[async_trait]
impl MachineInterface for SimulatedMachine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll_machine(&self) -> Result<MachineData, MachineError> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        self.readings(tick)
    }
}
