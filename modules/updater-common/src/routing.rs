//! Bus routing keys of the form `service.object.request`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid routing key {key:?}: {reason}")]
pub struct RoutingKeyError {
    pub key: String,
    pub reason: String,
}

macro_rules! routing_segment {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
            Wildcard,
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                    $name::Wildcard => "*",
                }
            }

            fn parse(segment: &str) -> Option<Self> {
                match segment {
                    $($text => Some($name::$variant),)+
                    "*" => Some($name::Wildcard),
                    _ => None,
                }
            }

            fn covers(&self, other: &Self) -> bool {
                *self == $name::Wildcard || self == other
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

routing_segment!(ServiceType {
    Employee => "employee",
    OrgUnit => "org_unit",
});

routing_segment!(ObjectType {
    Address => "address",
    Association => "association",
    Employee => "employee",
    Engagement => "engagement",
    It => "it",
    Kle => "kle",
    Leave => "leave",
    Manager => "manager",
    Owner => "owner",
    OrgUnit => "org_unit",
    RelatedUnit => "related_unit",
    Role => "role",
});

routing_segment!(RequestType {
    Create => "create",
    Edit => "edit",
    Terminate => "terminate",
    Refresh => "refresh",
});

/// Classification of a change notification: who, what, and which kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    pub service: ServiceType,
    pub object: ObjectType,
    pub request: RequestType,
}

impl RoutingKey {
    /// Binding for engagement changes on persons, any action.
    pub const ENGAGEMENT_BINDING: RoutingKey = RoutingKey {
        service: ServiceType::Employee,
        object: ObjectType::Engagement,
        request: RequestType::Wildcard,
    };

    /// Classification attached to dispatches started over HTTP.
    pub const ENGAGEMENT_EDIT: RoutingKey = RoutingKey {
        service: ServiceType::Employee,
        object: ObjectType::Engagement,
        request: RequestType::Edit,
    };

    pub fn new(service: ServiceType, object: ObjectType, request: RequestType) -> Self {
        Self {
            service,
            object,
            request,
        }
    }

    /// Whether a concrete key falls under this (possibly wildcarded) binding.
    pub fn matches(&self, key: &RoutingKey) -> bool {
        self.service.covers(&key.service)
            && self.object.covers(&key.object)
            && self.request.covers(&key.request)
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.service, self.object, self.request)
    }
}

impl FromStr for RoutingKey {
    type Err = RoutingKeyError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let fail = |reason: &str| RoutingKeyError {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = key.split('.');
        let (Some(service), Some(object), Some(request), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(fail("expected three dot-separated segments"));
        };

        Ok(RoutingKey {
            service: ServiceType::parse(service).ok_or_else(|| fail("unknown service type"))?,
            object: ObjectType::parse(object).ok_or_else(|| fail("unknown object type"))?,
            request: RequestType::parse(request).ok_or_else(|| fail("unknown request type"))?,
        })
    }
}
