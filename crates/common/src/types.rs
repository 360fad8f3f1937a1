use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Creates an identifier from its raw value.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw value.
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<i64>().map(Self)
            }
        }
    };
}

numeric_id!(
    /// Identifier of an order, assigned by the order store at creation.
    OrderId
);

numeric_id!(
    /// Identifier of a user owned by the users service.
    ///
    /// Orders only hold this as a foreign reference; nothing here owns users.
    UserId
);

numeric_id!(
    /// Identifier of a product owned by the products service.
    ProductId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_raw_value() {
        assert_eq!(OrderId::new(42).to_string(), "42");
        assert_eq!(UserId::new(7).to_string(), "7");
        assert_eq!(ProductId::new(101).to_string(), "101");
    }

    #[test]
    fn ids_parse_from_strings() {
        assert_eq!("101".parse::<ProductId>().unwrap(), ProductId::new(101));
        assert_eq!(" 7 ".parse::<UserId>().unwrap(), UserId::new(7));
        assert!("abc".parse::<OrderId>().is_err());
    }

    #[test]
    fn ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&UserId::new(7)).unwrap();
        assert_eq!(json, "7");
        let back: ProductId = serde_json::from_str("101").unwrap();
        assert_eq!(back, ProductId::new(101));
    }
}
