//! Domain layer for the machine runtime.
//!
//! - **`machine`** – The [`machine::MachineInterface`] trait every adapter
//!   implements, the [`machine::MachineData`] snapshot it returns, and the
//!   naming rule that turns a machine name into a topic segment.

pub mod machine;
