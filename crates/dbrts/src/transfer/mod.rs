//! Data movement building blocks: the batch copy job and the worker pool
//! that runs those jobs concurrently.

mod job;
mod pool;

pub use job::{page_count, BatchCopyJob, PageReader, PageWriter, Row};
pub use pool::{Job, JobHandle, WorkerPool};

#[cfg(test)]
pub(crate) use job::tests::{FakeReader, FakeWriter};
