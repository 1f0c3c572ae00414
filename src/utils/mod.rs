pub mod atomic;
pub mod formatting;
pub mod truncation;
