pub mod analysis;
pub mod detect;
pub mod error;
pub mod filtering;
pub mod ingest;
pub mod naming;
pub mod parsers;
pub mod preprocessing;
pub mod xmltree;
