pub mod assemble;
pub mod codec;
pub mod config;
pub mod dates;
pub mod dedup;
pub mod diagnostics;
pub mod feed;
pub mod link;
pub mod memory_mapped_rkyv;
pub mod model;
pub mod pipeline;
pub mod prepare_feed;
pub mod shape;
pub mod simplify;
pub mod stop_times;
