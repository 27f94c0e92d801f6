pub mod analyzers;
pub mod collect;
pub mod config;
pub mod error;
pub mod etl;
pub mod fetch;
pub mod geo;
pub mod infra;
pub mod norms;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod publish;
pub mod records;
pub mod schedule;
pub mod stats;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
