//! Declarative helpers shared by the record modules.

/// Declares a closed string-backed enum.
///
/// Generates `as_str`, `parse_name` (trimmed, ASCII case-insensitive), an
/// `ALL` table, `Display`, serde renames and a `FromStr` whose error is a
/// [`ValidationError::InvalidEnum`](crate::error::ValidationError) naming
/// the offending field.
macro_rules! memory_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident ($field:literal) {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Stable storage/wire name
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Parse from a storage/wire name
            pub fn parse_name(s: &str) -> Option<Self> {
                let s = s.trim();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::ValidationError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Self::parse_name(s).ok_or_else(|| $crate::error::ValidationError::InvalidEnum {
                    field: $field,
                    value: s.to_string(),
                    allowed: $name::ALL
                        .iter()
                        .map(|v| v.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                })
            }
        }
    };
}
