pub mod bucket;
pub mod field;
pub mod granularity;
pub mod observation;
pub mod query;
pub mod station;
