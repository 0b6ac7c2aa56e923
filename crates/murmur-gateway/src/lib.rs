pub mod bus;
pub mod connection;
pub mod filter;
pub mod presence;
