/// Generates a non-exhaustive enum of wire names together with its parse error.
///
/// Produces: the enum, a `Parse…Error` newtype, `as_str()`, `ALL`, `Display`,
/// `AsRef<str>` and a case-insensitive `FromStr`.
///
/// ```ignore
/// define_header_enum! {
///     error_type: ParseMyEnumError, "my enum value",
///     /// Doc comment for the enum.
///     pub enum MyEnum {
///         Foo => "foo-wire",
///         Bar => "bar-wire",
///     }
/// }
/// ```
macro_rules! define_header_enum {
    (
        error_type: $Err:ident, $what:literal,
        $(#[$enum_meta:meta])*
        $vis:vis enum $Name:ident {
            $(
                $(#[$var_meta:meta])*
                $variant:ident => $wire:literal
            ),+ $(,)?
        }
    ) => {
        #[doc = concat!("Error returned when parsing an unrecognized ", $what, ".")]
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $Err(pub String);

        impl std::fmt::Display for $Err {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!("unknown ", $what, ": {}"), self.0)
            }
        }

        impl std::error::Error for $Err {}

        $(#[$enum_meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        #[allow(missing_docs)]
        $vis enum $Name {
            $(
                $(#[$var_meta])*
                $variant,
            )+
        }

        impl $Name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$Name] = &[$( $Name::$variant, )+];

            /// Wire-format name string.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $Name::$variant => $wire, )+
                }
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl std::str::FromStr for $Name {
            type Err = $Err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s))
                    .ok_or_else(|| $Err(s.to_string()))
            }
        }
    };
}
