pub mod config_manager;
pub mod error;
pub mod groww_mappings;
pub mod traits;
pub mod types;

pub use config_manager::*;
pub use error::*;
pub use groww_mappings::*;
pub use traits::*;
pub use types::*;
