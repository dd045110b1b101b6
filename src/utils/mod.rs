//! Input discovery, channel lookup and time helpers

pub mod channel_manager;
pub mod file_utils;
pub mod misc;

// Helpers used across stages
pub use self::channel_manager::ChannelManager;
pub use file_utils::*;
pub use misc::*;
