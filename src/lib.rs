pub mod batch;
pub mod combined;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gtfs;
pub mod monitor;
pub mod output;
pub mod parser;
pub mod poller;
pub mod rules;
pub mod storage;
pub mod summary;
pub mod tracker;
pub mod util;
pub mod validation;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
