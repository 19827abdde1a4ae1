pub mod calendar;
pub mod dividends;
pub mod engine;
pub mod inflation;
pub mod metrics;
pub mod riskfree;
pub mod strategy;
pub mod tax;

pub use calendar::*;
pub use dividends::*;
pub use engine::*;
pub use inflation::*;
pub use metrics::*;
pub use riskfree::*;
pub use strategy::*;
pub use tax::*;
