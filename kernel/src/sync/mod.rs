//! Synchronization Primitives
//!
//! Global-state management shared by the interrupt and timer code. Mutable
//! driver state is otherwise kept in `spin::Mutex` fields of the owning
//! instance.

pub mod once_lock;

pub use once_lock::GlobalState;
