pub mod alert;
pub mod allocation;
pub mod count;
pub mod health;
pub mod lot;
pub mod movement;
pub mod position;
pub mod sync;

pub use alert::*;
pub use allocation::*;
pub use count::*;
pub use health::*;
pub use lot::*;
pub use movement::*;
pub use position::*;
pub use sync::*;
