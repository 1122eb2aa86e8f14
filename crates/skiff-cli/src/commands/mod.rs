pub mod monitor;
pub mod serve;
