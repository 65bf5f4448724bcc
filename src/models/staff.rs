//! Staff identity carried by bearer JWTs

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

/// Staff roles, ordered by reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    /// Hands out equipment at a cabinet
    Volunteer,
    /// Reviews requests and confirms returns for one city
    CityManager,
    /// All cities
    SuperAdmin,
}

/// JWT claims for authenticated staff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffClaims {
    pub sub: String,
    pub role: StaffRole,
    /// City the account is scoped to; super admins have none
    pub city_id: Option<i32>,
    pub exp: i64,
    pub iat: i64,
}

impl StaffClaims {
    /// Create a new JWT token
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Parse JWT token
    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    fn require_role(&self, role: StaffRole) -> Result<(), AppError> {
        if self.role >= role {
            Ok(())
        } else {
            Err(AppError::Authorization(format!(
                "Role {:?} or higher required",
                role
            )))
        }
    }

    pub fn require_volunteer(&self) -> Result<(), AppError> {
        self.require_role(StaffRole::Volunteer)
    }

    pub fn require_manager(&self) -> Result<(), AppError> {
        self.require_role(StaffRole::CityManager)
    }

    pub fn require_super_admin(&self) -> Result<(), AppError> {
        self.require_role(StaffRole::SuperAdmin)
    }

    /// Check the account may act on `city_id`
    pub fn require_city(&self, city_id: i32) -> Result<(), AppError> {
        if self.role == StaffRole::SuperAdmin || self.city_id == Some(city_id) {
            Ok(())
        } else {
            Err(AppError::Authorization(format!(
                "Not allowed to act on city {}",
                city_id
            )))
        }
    }

    /// Every account below super admin must be bound to a city
    pub fn check_scope(&self) -> Result<(), AppError> {
        match (self.role, self.city_id) {
            (StaffRole::SuperAdmin, _) | (_, Some(_)) => Ok(()),
            (role, None) => Err(AppError::Authentication(format!(
                "{:?} token carries no city",
                role
            ))),
        }
    }

    /// City filter to apply to list queries: own city, or the requested one for super admins
    pub fn scope_city(&self, requested: Option<i32>) -> Result<Option<i32>, AppError> {
        match (self.role, self.city_id) {
            (StaffRole::SuperAdmin, _) => Ok(requested),
            (_, Some(city_id)) => Ok(Some(city_id)),
            (_, None) => Err(AppError::Authorization(
                "Account is not scoped to a city".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: StaffRole, city_id: Option<i32>) -> StaffClaims {
        let now = chrono::Utc::now().timestamp();
        StaffClaims {
            sub: "noa".to_string(),
            role,
            city_id,
            exp: now + 3600,
            iat: now,
        }
    }

    #[test]
    fn test_token_round_trip() {
        let original = claims(StaffRole::CityManager, Some(3));
        let token = original.create_token("secret").unwrap();
        let parsed = StaffClaims::from_token(&token, "secret").unwrap();
        assert_eq!(parsed.role, StaffRole::CityManager);
        assert_eq!(parsed.city_id, Some(3));
        assert!(StaffClaims::from_token(&token, "other").is_err());
    }

    #[test]
    fn test_role_checks() {
        let volunteer = claims(StaffRole::Volunteer, Some(1));
        assert!(volunteer.require_volunteer().is_ok());
        assert!(volunteer.require_manager().is_err());

        let admin = claims(StaffRole::SuperAdmin, None);
        assert!(admin.require_manager().is_ok());
        assert!(admin.require_city(42).is_ok());
    }

    #[test]
    fn test_city_scope() {
        let manager = claims(StaffRole::CityManager, Some(1));
        assert!(manager.require_city(1).is_ok());
        assert!(manager.require_city(2).is_err());
        assert_eq!(manager.scope_city(Some(2)).unwrap(), Some(1));

        let admin = claims(StaffRole::SuperAdmin, None);
        assert_eq!(admin.scope_city(Some(2)).unwrap(), Some(2));
        assert_eq!(admin.scope_city(None).unwrap(), None);
        assert!(admin.check_scope().is_ok());
    }

    #[test]
    fn test_cityless_staff_token_is_refused() {
        for role in [StaffRole::Volunteer, StaffRole::CityManager] {
            let cityless = claims(role, None);
            assert!(matches!(cityless.check_scope(), Err(AppError::Authentication(_))));
            assert!(matches!(cityless.scope_city(None), Err(AppError::Authorization(_))));
            assert!(cityless.require_city(1).is_err());
        }
    }
}
