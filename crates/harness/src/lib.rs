//! Benchmark harness: drives an inference backend over a task dataset under a load
//! generator, measuring latency and task accuracy.

pub mod backend;
pub mod cache;
pub mod cli;
pub mod dataset;
pub mod driver;
pub mod errors;
pub mod loadgen;
pub mod slot;
pub mod types;

pub use backend::{Backend, BackendConfig, BackendKind, DummyBackend, create_backend};
pub use cache::SampleCache;
pub use dataset::{Dataset, DatasetConfig, NOT_APPLICABLE, create_dataset};
pub use driver::{Driver, DriverState};
pub use errors::HarnessError;
pub use loadgen::{
    LoadGenerator, LogSettings, Scenario, SingleStreamLoadGen, TestMode, TestSettings,
    TestSummary,
};
pub use slot::DataSlot;
pub use types::{DataFormat, ElementType, TensorDescriptor};
