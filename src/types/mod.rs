//! Event taxonomy.
//!
//! Every enumeration here mirrors an integer code table of the daemon. Codes
//! this binding does not know about decode to the table's `Unknown` member
//! instead of failing, so a newer daemon never breaks event delivery.

/// Declares a code table with a saturating decoder.
///
/// The last arm names the `Unknown` member and the code it encodes to; every
/// code not listed decodes to it.
macro_rules! code_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $code:literal,
            )*
            @unknown
            $(#[$umeta:meta])*
            $unknown:ident = $ucode:literal $(,)?
        }
    ) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        $(#[$meta])*
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )*
            $(#[$umeta])*
            $unknown,
        }

        impl $name {
            /// All members this binding knows, in code order. `Unknown` is not included.
            pub const KNOWN: &'static [$name] = &[$($name::$variant),*];

            /// Decode a raw code, saturating unknown codes to the `Unknown` member.
            #[must_use]
            pub fn from_code(code: i32) -> Self {
                match code {
                    $($code => Self::$variant,)*
                    _ => Self::$unknown,
                }
            }

            /// The raw code of this member.
            #[must_use]
            pub fn code(self) -> i32 {
                match self {
                    $(Self::$variant => $code,)*
                    Self::$unknown => $ucode,
                }
            }

            /// Whether this is the `Unknown` member.
            #[must_use]
            pub fn is_unknown(self) -> bool {
                matches!(self, Self::$unknown)
            }
        }

        impl From<i32> for $name {
            fn from(code: i32) -> Self {
                Self::from_code(code)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                let name = match self {
                    $(Self::$variant => stringify!($variant),)*
                    Self::$unknown => stringify!($unknown),
                };
                $crate::types::write_screaming(f, name)
            }
        }
    };
}

/// Write a `CamelCase` member name the way serde renames it:
/// `SCREAMING_SNAKE_CASE`.
pub(crate) fn write_screaming(f: &mut std::fmt::Formatter<'_>, name: &str) -> std::fmt::Result {
    use std::fmt::Write;

    for (i, ch) in name.char_indices() {
        if i > 0 && ch.is_uppercase() {
            f.write_char('_')?;
        }
        f.write_char(ch.to_ascii_uppercase())?;
    }
    Ok(())
}

mod event_kind;
mod lifecycle;
mod payload;

pub use event_kind::EventKind;
pub use lifecycle::{
    CrashedDetail, DefinedDetail, DomainEvent, DomainEventDetail, DomainEventType,
    PmSuspendedDetail, ResumedDetail, ShutdownDetail, StartedDetail, StoppedDetail,
    SuspendedDetail, UndefinedDetail,
};
pub use payload::{
    AgentLifecycleReason, AgentLifecycleState, BlockJobStatus, BlockJobType,
    ConnectionCloseReason, IoErrorAction, PmSuspendReason, PmWakeupReason,
};

use serde::{Deserialize, Serialize};

/// Transport-level handle of a managed domain.
///
/// The transport hands these out with every delivery; the binding wraps them
/// into a [`Domain`](crate::Domain) before calling a listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainHandle {
    name: String,
}

impl DomainHandle {
    /// Create a handle for the domain with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Domain name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}
