//! Background fetch execution off the render path.
//!
//! The render loop never performs network I/O. It submits `FetchRequest`s
//! here and keeps rendering from the cache; a bounded worker pool executes
//! the requests, retries with backoff, and writes results into the cache.

mod request;
mod service;

pub use request::{FetchHandle, FetchRequest, FetchResult, SubmitOutcome};
pub use service::BackgroundFetchService;
