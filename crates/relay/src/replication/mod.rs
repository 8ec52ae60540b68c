mod assembler;
mod client;

pub use assembler::{Candidate, Category, PackPlan, assemble};
pub use client::ClientReplication;
