pub mod log;
pub mod state_machine;

pub use log::MemLogStore;
pub use state_machine::KvStateMachine;
