pub mod shared;
pub mod stories;
