pub mod accumulator;
pub mod ledger;

pub use accumulator::accumulator_loop;
pub use ledger::{AccountIdentity, WorkLedger};
