//! Container utilities for the scene core.

mod generational_arena;
mod slot_queue;

pub use generational_arena::{ArenaIdx, GenerationalArena};
pub use slot_queue::{SlotHandle, SlotQueue};
