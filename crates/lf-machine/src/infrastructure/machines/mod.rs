//! Machine adapters.
//!
//! Only the simulated adapter ships here.  Physical drivers implement
//! [`crate::domain::machine::MachineInterface`] in the same way and are
//! selected through [`MachineKind`] in the configuration file.

pub mod simulated;

pub use simulated::{MachineKind, SimulatedMachine};
