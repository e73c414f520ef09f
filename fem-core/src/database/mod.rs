pub mod infrastructure;
pub mod ports;
