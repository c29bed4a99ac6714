// Core module - tool protocol and session handling
pub mod protocol;
pub mod session;
