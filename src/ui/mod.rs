// UI module - controller loop and its edges
//
// This module contains:
// - Controller: owns the Scheduler and LoginFlow, pumps task events
// - Presenter: the view seam every user-visible change goes through
// - ControlServer: loopback HTTP endpoint feeding controller commands

pub mod controller;
pub mod presenter;
pub mod server;

pub use controller::Controller;
pub use presenter::{LogPresenter, LoginHint, Presenter, RecordingPresenter, ViewEvent};
pub use server::{CommandSender, ControlCommand, ControlServer};
