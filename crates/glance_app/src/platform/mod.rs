pub mod app;
pub mod effects;
pub mod logging;
pub mod settings;
pub mod surface;

pub use app::{run_app, Coordinator};
pub use effects::{EffectRunner, Services};
pub use surface::{LoadNotifier, PreviewSurface, TerminalSurface};
