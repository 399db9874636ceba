//! Macros for defining typed ID types.

/// Macro to define a typed ID newtype over an opaque string.
///
/// The generated type provides:
/// - `new()` wrapping any string-like value (the master is trusted to hand
///   out well-formed ids)
/// - `as_str()` for borrowing the raw value
/// - `Display` and `FromStr` implementations; parsing rejects empty values
///   and interior whitespace
/// - transparent `Serialize` and `Deserialize` implementations
/// - `Ord`, `Hash`, and the other standard traits
///
/// # Example
///
/// ```ignore
/// define_id!(FrameworkId);
/// define_id!(TaskId);
///
/// let framework_id = FrameworkId::new("f-2024-0001");
/// let parsed: TaskId = "t1".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        /// A typed ID for this resource kind.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw id value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrows the raw id value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Parses an ID from a string, validating the canonical form.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                if let Some(c) = s.chars().find(|c| c.is_whitespace() || c.is_control()) {
                    return Err($crate::IdError::IllegalCharacter(c));
                }

                Ok(Self(s.to_string()))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}
