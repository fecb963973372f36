use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Identifier of a refresh session.
///
/// Zero is reserved for sessions that never enter the registry (the
/// single-event path); every session created through
/// [`RefreshQueue::create_session`](crate::engine::RefreshQueue::create_session)
/// gets a fresh nonzero id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SessionId(pub u64);

impl SessionId {
    pub const UNREGISTERED: SessionId = SessionId(0);

    pub fn is_registrable(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduling context under which a session's events are fired.
///
/// The dispatch thread keeps a modal depth; a deferred fire only runs while
/// its modality permits the current depth.
///
/// - `Any`: runs at any depth.
/// - `NonModal`: runs only when no modal is open (default).
/// - `Level(n)`: runs while the depth is at most `n`.
///
/// In configuration it is written `"any"`, `"nonmodal"` or `"level:<n>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(try_from = "String")]
pub enum Modality {
    Any,
    #[default]
    NonModal,
    Level(u32),
}

impl Modality {
    pub fn permits(self, depth: u32) -> bool {
        match self {
            Modality::Any => true,
            Modality::NonModal => depth == 0,
            Modality::Level(n) => depth <= n,
        }
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "any" => Ok(Modality::Any),
            "nonmodal" | "non_modal" => Ok(Modality::NonModal),
            other => other
                .strip_prefix("level:")
                .and_then(|n| n.trim().parse::<u32>().ok())
                .map(Modality::Level)
                .ok_or_else(|| {
                    format!(
                        "invalid modality: {other} (expected \"any\", \"nonmodal\" or \"level:<n>\")"
                    )
                }),
        }
    }
}

impl TryFrom<String> for Modality {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
