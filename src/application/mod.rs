//! Process-level wiring: settings, interaction log, proxy router, server lifecycle

pub mod app;

pub use app::Application;
