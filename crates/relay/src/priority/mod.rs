mod set;

pub use set::{PriorityItem, PrioritySet, PrioritySetError};
