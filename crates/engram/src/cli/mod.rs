pub mod commands;
pub mod daemon_control;
pub mod display;
