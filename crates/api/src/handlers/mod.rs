pub mod download;
pub mod files;
pub mod jobs;
pub mod logs;
pub mod reports;
