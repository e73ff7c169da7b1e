mod pserver;

pub use pserver::ParameterServer;
