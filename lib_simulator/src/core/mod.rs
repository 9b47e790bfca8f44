pub mod broker;
pub mod ports;
