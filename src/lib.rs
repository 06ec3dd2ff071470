pub mod cli;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod pipeline;
