pub mod commands;
pub mod decisions;
pub mod health;
pub mod stats;
pub mod system;
