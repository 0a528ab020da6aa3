pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod request;
pub mod service;
