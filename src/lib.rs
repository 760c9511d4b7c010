// src/lib.rs
pub mod ports {
    pub mod replay_feed;
}
pub mod trade {
    pub mod intent;
    pub mod execution {
        pub mod gateway;
        pub mod paper_broker;
    }
}
pub mod config;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod pair_stats;
pub mod pnl_log;
pub mod risk;
pub mod screening;
pub mod signal;
pub mod stats;
pub mod strategy;
pub mod synthetic;
