pub mod args;
pub mod camera;
pub mod config;
pub mod detector;
pub mod error;
pub mod inference;
pub mod landmarks;
pub mod output;
pub mod overlay;
pub mod pipeline;
pub mod segmentation;
pub mod topology;
pub mod types;
