//! ULID identifiers.
//!
//! ULIDs sort lexicographically by creation time, so listing a directory of
//! `{id}.bin` files in name order yields entries oldest first.

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident, $ext:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            id: ulid::Ulid,
        }

        impl $name {
            /// File extension used by the file backing store.
            pub const EXTENSION: &'static str = $ext;

            #[must_use]
            pub const fn new(id: ulid::Ulid) -> Self {
                Self { id }
            }

            #[must_use]
            pub fn generate() -> Self {
                Self {
                    id: ulid::Ulid::new(),
                }
            }

            /// Parses `{ulid}.{ext}`, refusing anything that could escape
            /// the directory it was listed from.
            #[must_use]
            pub fn from_filename(filename: &str) -> Option<Self> {
                if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
                    return None;
                }

                let stem = filename.strip_suffix($ext)?.strip_suffix('.')?;
                ulid::Ulid::from_string(stem).ok().map(Self::new)
            }

            #[must_use]
            pub fn filename(&self) -> String {
                format!("{}.{}", self.id, $ext)
            }

            #[must_use]
            pub const fn ulid(&self) -> ulid::Ulid {
                self.id
            }

            /// Milliseconds since the Unix epoch at which the id was made.
            #[must_use]
            pub const fn timestamp_ms(&self) -> u64 {
                self.id.timestamp_ms()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.id)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                ulid::Ulid::from_string(s).map(Self::new)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.id.to_string())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                ulid::Ulid::from_string(&s)
                    .map(Self::new)
                    .map_err(serde::de::Error::custom)
            }
        }
    };
}

ulid_id!(
    /// Identifies one queue entry.
    EntryId,
    "bin"
);

ulid_id!(
    /// Identifies a stored message payload, shared by every entry derived
    /// from the same submission.
    PayloadId,
    "eml"
);

ulid_id!(
    /// Proof of holding a claim. A stale token cannot change the entry.
    LeaseToken,
    "lease"
);
