pub mod broadcast;
pub mod connection;
pub mod error;
pub mod models;
pub mod recording;
pub mod samples;
pub mod settings;
