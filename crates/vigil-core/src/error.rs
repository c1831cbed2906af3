pub use vigil_types::error::{Result, VigilError};
