//! Shared memory windows
//!
//! - [`SharedArena`] splits the host arena into disjoint per-VM slots
//! - [`WindowManager`] places the dstore and zcopy windows of one device

pub mod arena;
pub mod window;

pub use arena::{SharedArena, Slot};
pub use window::{MemoryWindow, WindowBacking, WindowManager};
