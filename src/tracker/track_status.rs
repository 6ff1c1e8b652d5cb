use serde::{Deserialize, Serialize};

/// Lifecycle of a track.
///
/// `Tentative -> Confirmed <-> Coasting`, and any state may end in `Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TrackStatus {
    /// Born from an unmatched detection, not yet trusted.
    #[default]
    Tentative,
    /// Matched often enough to be reported as a real object.
    Confirmed,
    /// Confirmed but missed recently; predicted forward without corrections.
    Coasting,
    /// Terminal. Removed from the live set at the end of the cycle.
    Deleted,
}

impl TrackStatus {
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Deleted)
    }
}
