//! Internal utilities.

pub mod slab;

pub use slab::{Slab, SlotId};
