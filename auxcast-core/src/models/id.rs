use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Generate a 12-character nanoid for entity IDs
pub fn generate_id() -> String {
    nanoid!(12)
}

/// Stamps out a nanoid-backed ID newtype stored as Postgres TEXT.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(generate_id())
            }

            #[must_use]
            pub const fn from_string(id: String) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }
        }

        impl sqlx::Encode<'_, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
                <String as sqlx::Decode<sqlx::Postgres>>::decode(value).map(Self)
            }
        }
    };
}

entity_id!(
    /// Identifies a user (curator or listener)
    UserId
);

entity_id!(
    /// Identifies a broadcast
    BroadcastId
);

entity_id!(
    /// Identifies a chat message
    MessageId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_12_chars_and_unique() {
        assert_eq!(generate_id().len(), 12);
        assert_ne!(UserId::new(), UserId::new());
        assert_ne!(BroadcastId::new(), BroadcastId::new());
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn test_display_and_from_round_trip() {
        let id = BroadcastId::from("abc123def456".to_string());
        assert_eq!(id.to_string(), "abc123def456");
        assert_eq!(id.as_str(), "abc123def456");
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = BroadcastId::from_string("abc123def456".to_string());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc123def456\"");
        let back: BroadcastId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
