mod counter;
pub mod optimization;
mod partition;
mod service;
pub mod storage;

#[cfg(test)]
mod test;

pub use counter::GlobalStep;
pub use partition::shard_range;
pub use service::ParameterServer;
