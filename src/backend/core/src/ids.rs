//! Strongly-typed identifiers.
//!
//! Every entity is keyed by a UUID; the newtypes keep a lead id from being
//! passed where a deal id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// An authenticated principal.
    IdentityId
);
uuid_id!(
    /// A tenant.
    OrganizationId
);
uuid_id!(ProfileId);
uuid_id!(EmployeeId);
uuid_id!(RoleId);
uuid_id!(PermissionId);
uuid_id!(AssignmentId);
uuid_id!(PipelineId);
uuid_id!(StageId);
uuid_id!(LeadId);
uuid_id!(DealId);
uuid_id!(CustomerId);
uuid_id!(HistoryEntryId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct_and_parse_back() {
        let a = LeadId::new();
        let b = LeadId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<LeadId>().unwrap(), a);
    }

    #[test]
    fn test_serializes_as_bare_uuid() {
        let id = StageId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.0));
    }
}
