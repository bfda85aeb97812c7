//! Logical buckets: the two entity classes a document can belong to, and the
//! physical bucket record kept by the local object store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// The closed set of entity classes documents are filed under.
///
/// Each class owns exactly one bucket; every call site selects the bucket
/// through this discriminator instead of passing raw bucket names around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityClass {
    Technician,
    Company,
}

impl EntityClass {
    pub const ALL: [EntityClass; 2] = [EntityClass::Technician, EntityClass::Company];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityClass::Technician => "technician",
            EntityClass::Company => "company",
        }
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "technician" => Ok(EntityClass::Technician),
            "company" => Ok(EntityClass::Company),
            other => Err(format!("unknown entity class `{}`", other)),
        }
    }
}

/// Concrete bucket names backing each entity class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketNames {
    pub technician: String,
    pub company: String,
}

impl Default for BucketNames {
    fn default() -> Self {
        Self {
            technician: "technician-documents".into(),
            company: "company-documents".into(),
        }
    }
}

impl BucketNames {
    pub fn name_for(&self, class: EntityClass) -> &str {
        match class {
            EntityClass::Technician => &self.technician,
            EntityClass::Company => &self.company,
        }
    }

    /// Reverse lookup used when a request carries a physical bucket name
    /// (e.g. inside a signed URL).
    pub fn class_for(&self, bucket_name: &str) -> Option<EntityClass> {
        EntityClass::ALL
            .into_iter()
            .find(|class| self.name_for(*class) == bucket_name)
    }
}

/// A bucket registered in the local object store.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket (UUID for internal DB use).
    pub id: Uuid,

    /// Bucket name (must conform to DNS naming rules).
    pub name: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names_resolve_both_ways() {
        let names = BucketNames::default();
        for class in EntityClass::ALL {
            assert_eq!(names.class_for(names.name_for(class)), Some(class));
        }
        assert_eq!(names.class_for("other-bucket"), None);
    }

    #[test]
    fn entity_class_parses_from_path_segment() {
        assert_eq!("technician".parse::<EntityClass>(), Ok(EntityClass::Technician));
        assert_eq!("company".parse::<EntityClass>(), Ok(EntityClass::Company));
        assert!("Company".parse::<EntityClass>().is_err());
    }
}
