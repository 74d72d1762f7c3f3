//! Client connection layer

pub mod connection;
pub mod factory;

pub use connection::{ConnectOptions, Connection};
pub use factory::ConnectionFactory;
