//! The supervised control plane: Guardian, QueueManager, the TestExecutor
//! FSM, and the worker contracts a TestExecutor drives through its
//! lifecycle (spec §2, §4).

pub mod driver;
pub mod events;
pub mod fsm;
pub mod guardian;
pub mod queue;
pub mod workers;
