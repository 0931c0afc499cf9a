use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// User identity = opaque id issued by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Accept an id from an untrusted source, rejecting blank values.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ValidationError::EmptyField("user id"));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SurplusId(pub Uuid);

impl SurplusId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SurplusId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SurplusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ChatId(pub Uuid);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// The three party kinds.  `"volunteer"` is accepted on ingress and
/// canonicalized to [`Role::Driver`]; there is no fourth role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Role {
    Canteen,
    Ngo,
    Driver,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Canteen => "canteen",
            Role::Ngo => "ngo",
            Role::Driver => "driver",
        }
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "canteen" => Ok(Role::Canteen),
            "ngo" => Ok(Role::Ngo),
            "driver" | "volunteer" => Ok(Role::Driver),
            _ => Err(ValidationError::UnknownRole(s.to_string())),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Role> for &'static str {
    fn from(role: Role) -> Self {
        role.as_str()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An identity together with its canonical role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Party {
    pub id: UserId,
    pub role: Role,
}

impl Party {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: UserId(id.into()),
            role,
        }
    }
}

// ---------------------------------------------------------------------------
// Surplus status
// ---------------------------------------------------------------------------

/// Lifecycle status.  The lowercase spellings are the persisted values and
/// must not change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "&'static str")]
pub enum SurplusStatus {
    Available,
    Claimed,
    Collected,
    Expired,
}

impl SurplusStatus {
    pub const ALL: [SurplusStatus; 4] = [
        SurplusStatus::Available,
        SurplusStatus::Claimed,
        SurplusStatus::Collected,
        SurplusStatus::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SurplusStatus::Available => "available",
            SurplusStatus::Claimed => "claimed",
            SurplusStatus::Collected => "collected",
            SurplusStatus::Expired => "expired",
        }
    }

    /// `collected` and `expired` records never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, SurplusStatus::Collected | SurplusStatus::Expired)
    }
}

impl FromStr for SurplusStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(SurplusStatus::Available),
            "claimed" => Ok(SurplusStatus::Claimed),
            "collected" => Ok(SurplusStatus::Collected),
            "expired" => Ok(SurplusStatus::Expired),
            _ => Err(ValidationError::UnknownStatus(s.to_string())),
        }
    }
}

impl TryFrom<String> for SurplusStatus {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SurplusStatus> for &'static str {
    fn from(status: SurplusStatus) -> Self {
        status.as_str()
    }
}

impl fmt::Display for SurplusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Food category
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "&'static str")]
pub enum FoodCategory {
    Vegetarian,
    NonVegetarian,
    Vegan,
    Beverages,
    Snacks,
    Desserts,
}

impl FoodCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FoodCategory::Vegetarian => "vegetarian",
            FoodCategory::NonVegetarian => "non-vegetarian",
            FoodCategory::Vegan => "vegan",
            FoodCategory::Beverages => "beverages",
            FoodCategory::Snacks => "snacks",
            FoodCategory::Desserts => "desserts",
        }
    }
}

impl FromStr for FoodCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vegetarian" => Ok(FoodCategory::Vegetarian),
            "non-vegetarian" => Ok(FoodCategory::NonVegetarian),
            "vegan" => Ok(FoodCategory::Vegan),
            "beverages" => Ok(FoodCategory::Beverages),
            "snacks" => Ok(FoodCategory::Snacks),
            "desserts" => Ok(FoodCategory::Desserts),
            _ => Err(ValidationError::UnknownCategory(s.to_string())),
        }
    }
}

impl TryFrom<String> for FoodCategory {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FoodCategory> for &'static str {
    fn from(category: FoodCategory) -> Self {
        category.as_str()
    }
}
