//! Rebuild source and destination: the durable backup store and the vector
//! store it regenerates.

pub mod backup;
pub mod vector;
