pub mod app;
pub mod config;
pub mod contigs;
pub mod domain;
pub mod error;
pub mod extract;
pub mod fs_util;
pub mod mapper;
pub mod output;
pub mod sampler;
pub mod table;
