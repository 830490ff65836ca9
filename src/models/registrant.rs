use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Registrant {
    pub id: String,
    pub name: Option<String>,
    /// Identifier issued by the identity authority, absent until assigned.
    pub unique_id: Option<String>,
}

impl Registrant {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            unique_id: None,
        }
    }
}
