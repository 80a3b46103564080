//! Types shared by every engagement-updater crate: settings, the error
//! taxonomy, entity references and bus routing keys.

pub mod config;
pub mod error;
pub mod routing;
pub mod types;

pub use config::{AmqpSettings, SecretString, Settings};
pub use error::{Api, ConfigError, DispatchError, LookupError, UpstreamError};
pub use routing::{ObjectType, RequestType, RoutingKey, RoutingKeyError, ServiceType};
pub use types::{EntityReference, NotificationPayload};
