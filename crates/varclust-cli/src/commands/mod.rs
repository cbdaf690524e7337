pub mod blocks;
pub mod cluster;
pub mod deprecate;
pub mod hash;
pub mod operations;
pub mod recover;
