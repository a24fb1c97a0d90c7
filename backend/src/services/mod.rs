pub mod allocation;
pub mod count;
pub mod ledger;
pub mod lot;
pub mod position;
pub mod status;
pub mod sync;

pub use allocation::AllocationService;
pub use count::CountService;
pub use ledger::LedgerService;
pub use lot::LotService;
pub use position::PositionService;
pub use status::StatusService;
pub use sync::SyncService;
