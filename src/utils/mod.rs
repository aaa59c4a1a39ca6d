pub mod correlation;
pub mod logging;
pub mod text;
