//! Domain models for the Stock Ledger

mod alert;
mod count;
mod lot;
mod movement;
mod position;

pub use alert::*;
pub use count::*;
pub use lot::*;
pub use movement::*;
pub use position::*;
