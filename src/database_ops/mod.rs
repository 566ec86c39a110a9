pub mod analysis;
pub mod backfill;
pub mod db;
pub mod rankings_cache;
