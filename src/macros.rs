/// Declares the well-known partition type constants together with the
/// lookups from a GUID or a name.
macro_rules! partition_types {
    (
        $(
            $(#[$docs:meta])*
            ($upcase:ident, $guid:expr, $desc:expr)$(,)*
        )+
    ) => {
        const fn str_to_uuid_or_panic(s: &str) -> Uuid {
            match Uuid::try_parse(s) {
                Ok(u) => u,
                Err(_) => panic!("string was not an uuid"),
            }
        }
        $(
            $(#[$docs])*
            pub const $upcase: Type = Type {
                guid: str_to_uuid_or_panic($guid),
                desc: $desc,
            };
        )+

        /// Every type this crate knows a name for.
        pub const KNOWN_TYPES: &[Type] = &[$($upcase),+];

        impl FromStr for Type {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(
                        $guid |
                        stringify!($upcase) => Ok($upcase),
                    )+
                    _ => Uuid::from_str(s)
                        .map(Type::from)
                        .map_err(|_| "Invalid Partition Type GUID.".to_string()),
                }
            }
        }

        impl From<Uuid> for Type {
            fn from(guid: Uuid) -> Self {
                $(
                    if guid == $upcase.guid {
                        return $upcase;
                    }
                )+
                Type {
                    guid,
                    desc: "Unknown",
                }
            }
        }
    }
}
