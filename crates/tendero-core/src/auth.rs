//! # Store Roles and Permissions
//!
//! One permission matrix, checked once before any engine operation runs.
//!
//! ```text
//! ┌──────────────────┬───────┬───────┬────────┬───────────┐
//! │ Permission       │ owner │ admin │ seller │ assistant │
//! ├──────────────────┼───────┼───────┼────────┼───────────┤
//! │ Sell             │   ✓   │   ✓   │   ✓    │     ✓     │
//! │ ManageOrders     │   ✓   │   ✓   │   ✓    │           │
//! │ RegisterPayment  │   ✓   │   ✓   │   ✓    │           │
//! │ ManageCredit     │   ✓   │   ✓   │        │           │
//! │ ManageInventory  │   ✓   │   ✓   │        │           │
//! │ ManageCatalog    │   ✓   │   ✓   │        │           │
//! │ ManageCustomers  │   ✓   │   ✓   │   ✓    │           │
//! │ ViewReports      │   ✓   │   ✓   │   ✓    │           │
//! │ ManageMembers    │   ✓   │   ✓   │        │           │
//! └──────────────────┴───────┴───────┴────────┴───────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;

/// A user's role within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Seller,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Create point-of-sale sales and place online orders.
    Sell,
    /// Confirm or reject online orders.
    ManageOrders,
    RegisterPayment,
    /// Close credit accounts.
    ManageCredit,
    /// Manual stock movements and reversals.
    ManageInventory,
    /// Create products, change prices, delete products.
    ManageCatalog,
    ManageCustomers,
    ViewReports,
    ManageMembers,
}

impl Role {
    pub fn allows(&self, permission: Permission) -> bool {
        use Permission::*;

        match self {
            Role::Owner | Role::Admin => true,
            Role::Seller => matches!(
                permission,
                Sell | ManageOrders | RegisterPayment | ManageCustomers | ViewReports
            ),
            Role::Assistant => permission == Sell,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Seller => "seller",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "seller" => Ok(Role::Seller),
            "assistant" => Ok(Role::Assistant),
            other => Err(ValidationError::InvalidFormat {
                field: "role".to_string(),
                reason: format!("unknown role '{}'", other),
            }),
        }
    }
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Sell => "sell",
            Permission::ManageOrders => "manage orders",
            Permission::RegisterPayment => "register payments",
            Permission::ManageCredit => "manage credit accounts",
            Permission::ManageInventory => "manage inventory",
            Permission::ManageCatalog => "manage the catalog",
            Permission::ManageCustomers => "manage customers",
            Permission::ViewReports => "view reports",
            Permission::ManageMembers => "manage members",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
