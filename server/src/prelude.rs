pub use crate::core::app::App;
pub use canopy_types::error::{CnResult, Error};
pub use canopy_types::types::Timestamp;

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
