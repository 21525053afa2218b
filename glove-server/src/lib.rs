pub mod audio;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod fingers;
pub mod ipc;
pub mod library;
pub mod manual;
pub mod scheduler;
pub mod session;
pub mod song;
