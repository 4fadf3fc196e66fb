pub mod app;
pub mod audio;
pub mod catalog;
pub mod command;
pub mod config;
pub mod core;
pub mod instance;
pub mod library;
pub mod model;
pub mod selection;
pub mod shuffle;
pub mod ui;
