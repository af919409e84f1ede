pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod filter;
pub mod intervals;
pub mod output;
pub mod pileup;
pub mod quality;
pub mod reference;
pub mod sample;
pub mod storage;
pub mod types;

pub use config::{Config, PileupOptions};
pub use driver::{RegionDriver, RunStats};
pub use error::{Error, Result};
