use serde::Deserialize;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Teacher,
    SchoolAdmin,
    SuperAdmin,
}

/// Verified caller identity handed over by the boundary layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
    #[serde(default)]
    pub school_id: Option<String>,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::SchoolAdmin | Role::SuperAdmin)
    }

    pub fn belongs_to(&self, school_id: &str) -> bool {
        match self.role {
            Role::SuperAdmin => true,
            Role::Teacher | Role::SchoolAdmin => self.school_id.as_deref() == Some(school_id),
        }
    }

    pub fn require_school(&self, school_id: &str) -> Result<(), CoreError> {
        if self.belongs_to(school_id) {
            Ok(())
        } else {
            Err(CoreError::Forbidden(
                "actor is not scoped to this school".to_string(),
            ))
        }
    }

    pub fn require_admin_of(&self, school_id: &str) -> Result<(), CoreError> {
        if !self.is_admin() {
            return Err(CoreError::Forbidden(
                "only school administrators may do this".to_string(),
            ));
        }
        self.require_school(school_id)
    }

    /// Self-review is refused regardless of role.
    pub fn require_not_author(&self, author_id: &str) -> Result<(), CoreError> {
        if self.user_id == author_id {
            return Err(CoreError::Forbidden(
                "cannot review your own submission".to_string(),
            ));
        }
        Ok(())
    }
}
