pub mod app;
pub mod bam;
pub mod batch;
pub mod cloud;
pub mod config;
pub mod domain;
pub mod error;
pub mod fasta;
pub mod fs_util;
pub mod genbank;
pub mod gisaid;
pub mod metadata;
pub mod output;
pub mod sample;
pub mod schema;
pub mod store;
pub mod submission;
pub mod transfer;
pub mod xml;
