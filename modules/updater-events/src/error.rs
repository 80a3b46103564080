use thiserror::Error;

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("AMQP connection error: {0}")]
    Connection(String),

    #[error("AMQP topology error: {0}")]
    Topology(String),

    #[error("AMQP consume error: {0}")]
    Consume(String),

    #[error("AMQP acknowledgement error: {0}")]
    Acknowledge(String),
}
