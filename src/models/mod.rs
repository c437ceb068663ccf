//! Data models representing database entities and their API shapes.
//!
//! Each file pairs a `sqlx::FromRow` struct for its table with the request
//! and response bodies of the matching feature module.

/// Defines a `TEXT`-backed status enum.
///
/// Columns are read with `#[sqlx(try_from = "String")]` and written with
/// `as_str()`; the serde representation matches the stored text.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                match value.as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} value: {other}", stringify!($name))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use text_enum;

/// Signup, login and session payloads
pub mod account;
pub mod address;
pub mod admin;
/// Wallet ledger rows
pub mod credit_wallet;
pub mod employee_sync;
pub mod employer;
pub mod organization;
pub mod partner;
pub mod plaid_account;
/// Employer programs and monthly distribution periods
pub mod program;
pub mod questionnaire;
pub mod resource;
pub mod session;
/// ACH transfers between linked banks and pooled savings
pub mod transaction;
pub mod user;

#[cfg(test)]
mod tests {
    use super::session::Role;

    #[test]
    fn text_enums_round_trip_through_strings() {
        assert_eq!(Role::try_from("employer".to_string()), Ok(Role::Employer));
        assert_eq!(Role::Admin.as_str(), "admin");
        assert_eq!(Role::User.to_string(), "user");
        assert!(Role::try_from("root".to_string()).is_err());
    }

    #[test]
    fn text_enums_serialize_as_stored_text() {
        assert_eq!(serde_json::to_string(&Role::Employer).unwrap(), "\"employer\"");
        let parsed: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(parsed, Role::Admin);
    }
}
