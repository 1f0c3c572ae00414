pub mod vulnerability;

pub use vulnerability::*;
