//! Event bus plumbing.
//!
//! Connects to the MO topic exchange, binds a durable queue per routing key
//! pattern and hands deliveries out as [`Notification`]s. Acknowledgement is
//! left to the consumer, so redelivery policy lives with the handler.

pub mod bus;
pub mod delivery;
pub mod error;

pub use bus::{AmqpSystem, NotificationStream};
pub use delivery::{DeliveryAcker, Notification};
pub use error::{BusError, Result};
