//! Binary-side wiring: settings resolution, progress UI and the run itself.

pub(crate) mod progress_manager;
pub(crate) mod runtime;
pub(crate) mod settings;
