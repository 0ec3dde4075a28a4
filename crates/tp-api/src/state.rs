use std::sync::Arc;
use tp_builder::ServiceContext;
use tp_control::driver::TestExecutorDriver;

/// Shared axum state. Handlers reach the Guardian/QueueManager through
/// `ctx` (spec §4.1 "GetQueueActor") and drive newly-admitted tests through
/// `driver` (spec §2 data flow, §5 scheduling model).
pub struct ApiState {
    pub ctx: Arc<ServiceContext>,
    pub driver: Arc<TestExecutorDriver>,
}

impl ApiState {
    pub fn new(ctx: Arc<ServiceContext>, driver: Arc<TestExecutorDriver>) -> Self {
        Self { ctx, driver }
    }
}
