pub mod environment;
pub mod load;
pub mod shared;
