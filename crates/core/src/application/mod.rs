// Application Layer - use cases over ports

pub mod codec;
pub mod push;
pub mod worker;

pub use codec::CallPayload;
pub use push::{
    handler_fn, DispatchRequest, DispatchStatus, EndpointRegistry, EnqueueOptions,
    HandlerOutcome, PushEndpoint, TaskHandler,
};
pub use worker::{
    BatchItem, BatchProcessor, Completions, DrainOutcome, DrainStats, PullWorker,
    PullWorkerConfig,
};
