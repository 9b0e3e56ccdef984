//! Core domain types shared across the service

pub mod game;
pub mod notification;

pub use game::*;
pub use notification::*;
