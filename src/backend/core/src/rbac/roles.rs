//! Predefined role templates seeded into every new organization.
//!
//! | Role     | Description                                                  |
//! |----------|--------------------------------------------------------------|
//! | Manager  | Full control of the sales pipeline and customer records      |
//! | Sales    | Work leads and deals through the pipeline                    |
//! | Support  | Handle customer issues and activities                        |
//! | Viewer   | Read-only access to pipeline and customer data               |
//!
//! Vendors (organization owners) do not need a role: they resolve to the
//! universal set minus [`VENDOR_EXCLUSIONS`].

use super::models::PermissionKey;

/// Pairs withheld from organization owners.
pub const VENDOR_EXCLUSIONS: &[(&str, &str)] = &[("issue", "create")];

/// Resources known to the CRM core.
pub const RESOURCES: &[&str] = &[
    "lead", "deal", "customer", "pipeline", "stage", "order", "payment", "issue", "activity",
    "employee", "role",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredefinedRole {
    Manager,
    Sales,
    Support,
    Viewer,
}

impl PredefinedRole {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Manager => "Manager",
            Self::Sales => "Sales",
            Self::Support => "Support",
            Self::Viewer => "Viewer",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Manager => "Full control of the sales pipeline and customer records",
            Self::Sales => "Work leads and deals through the pipeline",
            Self::Support => "Handle customer issues and activities",
            Self::Viewer => "Read-only access to pipeline and customer data",
        }
    }

    /// Permission keys granted by this template.
    pub fn permissions(&self) -> Vec<PermissionKey> {
        let pairs: &[(&str, &str)] = match self {
            Self::Manager => &[
                ("lead", "*"),
                ("deal", "*"),
                ("customer", "*"),
                ("pipeline", "*"),
                ("stage", "*"),
                ("order", "*"),
                ("activity", "*"),
                ("issue", "*"),
                ("payment", "read"),
                ("employee", "read"),
                ("role", "read"),
            ],
            Self::Sales => &[
                ("lead", "create"),
                ("lead", "read"),
                ("lead", "update"),
                ("deal", "create"),
                ("deal", "read"),
                ("deal", "update"),
                ("customer", "create"),
                ("customer", "read"),
                ("customer", "update"),
                ("pipeline", "read"),
                ("stage", "read"),
                ("activity", "create"),
                ("activity", "read"),
            ],
            Self::Support => &[
                ("customer", "read"),
                ("lead", "read"),
                ("deal", "read"),
                ("issue", "create"),
                ("issue", "read"),
                ("issue", "update"),
                ("activity", "create"),
                ("activity", "read"),
            ],
            Self::Viewer => &[
                ("lead", "read"),
                ("deal", "read"),
                ("customer", "read"),
                ("pipeline", "read"),
                ("stage", "read"),
            ],
        };
        pairs.iter().map(|(r, a)| PermissionKey::new(*r, *a)).collect()
    }

    pub fn all() -> Vec<PredefinedRole> {
        vec![Self::Manager, Self::Sales, Self::Support, Self::Viewer]
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all()
            .into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(name.trim()))
    }
}

/// The vendor exclusions as keys.
pub fn vendor_exclusions() -> Vec<PermissionKey> {
    VENDOR_EXCLUSIONS
        .iter()
        .map(|(r, a)| PermissionKey::new(*r, *a))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewer_is_read_only() {
        assert!(PredefinedRole::Viewer
            .permissions()
            .iter()
            .all(|p| p.action == "read"));
    }

    #[test]
    fn test_templates_only_reference_known_resources() {
        for role in PredefinedRole::all() {
            for key in role.permissions() {
                assert!(RESOURCES.contains(&key.resource.as_str()), "{}", key);
            }
        }
    }

    #[test]
    fn test_from_name() {
        assert_eq!(PredefinedRole::from_name("sales"), Some(PredefinedRole::Sales));
        assert_eq!(PredefinedRole::from_name("Admin"), None);
    }

    #[test]
    fn test_vendor_exclusions() {
        assert_eq!(vendor_exclusions(), vec![PermissionKey::new("issue", "create")]);
    }
}
