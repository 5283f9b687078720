#![forbid(unsafe_code)]

//! Filter state for the video list and the two channel lists, plus the
//! controllers that keep it in sync with the current URL.

pub mod channel;
pub mod video;

use serde::{Deserialize, Serialize};

/// Declares a closed filter enum whose query representation is a lowercase
/// token. Unknown tokens fall back to the documented default instead of
/// failing.
macro_rules! query_enum {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident, { $($variant:ident => $token:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $token),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value.trim() {
                    $($token => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Decodes an optional query value, substituting the default for
            /// missing or unrecognized tokens.
            pub fn from_param(value: Option<&str>) -> Self {
                value.and_then(Self::parse).unwrap_or_default()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

query_enum!(
    /// Which videos to show based on whether they were watched.
    WatchStatus, default = Unwatched, {
        Unwatched => "unwatched",
        Watched => "watched",
        All => "all",
    }
);

query_enum!(
    /// How several selected tags combine on the video list.
    TagMode, default = Any, {
        Any => "any",
        All => "all",
        Except => "except",
    }
);

query_enum!(
    /// Treatment of videos the user flagged as not interesting.
    NotInterestedFilter, default = Exclude, {
        Exclude => "exclude",
        Only => "only",
        Include => "include",
    }
);

query_enum!(
    /// Tag combination on the channel lists, which has no exclusion mode.
    ChannelTagMode, default = Any, {
        Any => "any",
        All => "all",
    }
);

/// Compares two tag selections as sets.
pub(crate) fn same_tag_set(left: &[String], right: &[String]) -> bool {
    left.len() == right.len() && left.iter().all(|tag| right.contains(tag))
}
