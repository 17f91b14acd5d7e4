//! Architecture support.
//!
//! The subsystem only needs ordering primitives from the CPU; register
//! access itself goes through [`crate::mmio`].

pub mod barriers;
