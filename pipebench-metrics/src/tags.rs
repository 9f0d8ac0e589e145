use strum::{EnumCount, IntoEnumIterator};

use crate::error::{Error, Result};

/// Every event the harness can count. The set is closed: a tag that is not
/// listed here cannot be counted.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::EnumCount,
    strum::IntoStaticStr,
)]
#[repr(u8)]
pub enum ScoreTag {
    #[strum(serialize = "DNSResolve")]
    DnsResolve,
    #[strum(serialize = "DNSFailed")]
    DnsFailed,
    #[strum(serialize = "TooSlow")]
    TooSlow,
    #[strum(serialize = "TooManySpam")]
    TooManySpam,

    #[strum(serialize = "register-viewer")]
    RegisterViewer,
    #[strum(serialize = "register-viewer-fail")]
    RegisterViewerFail,
    #[strum(serialize = "reserve-livestream")]
    ReserveLivestream,
    #[strum(serialize = "reserve-livestream-fail")]
    ReserveLivestreamFail,
    #[strum(serialize = "browse-livestreams")]
    BrowseLivestreams,
    #[strum(serialize = "browse-livestreams-fail")]
    BrowseLivestreamsFail,
    #[strum(serialize = "post-tip")]
    PostTip,
    #[strum(serialize = "post-tip-fail")]
    PostTipFail,

    /// One unit per yen tipped.
    #[strum(serialize = "tip")]
    Tip,
    /// One unit per reserved livestream.
    #[strum(serialize = "reservation")]
    Reservation,
}

impl ScoreTag {
    pub const COUNT: usize = <Self as EnumCount>::COUNT;

    /// Strict lookup by wire name.
    pub fn parse(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| Error::UnknownTag(name.to_string()))
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn all() -> impl Iterator<Item = ScoreTag> {
        Self::iter()
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }

    #[must_use]
    pub fn is_revenue(self) -> bool {
        matches!(self, Self::Tip | Self::Reservation)
    }

    #[must_use]
    pub fn default_weight(self) -> u64 {
        match self {
            Self::Tip => 1,
            Self::Reservation => 10,
            _ => 0,
        }
    }
}

/// The success tag of a scenario and the tag counting its failures.
///
/// The pairing is declared where the scenario is registered; nothing derives
/// one tag from the other's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagPair {
    pub success: ScoreTag,
    pub fail: ScoreTag,
}

impl TagPair {
    pub const fn new(success: ScoreTag, fail: ScoreTag) -> Self {
        Self { success, fail }
    }
}

/// Score weights for revenue tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightTable {
    weights: [u64; ScoreTag::COUNT],
}

impl Default for WeightTable {
    fn default() -> Self {
        let mut weights = [0; ScoreTag::COUNT];
        for tag in ScoreTag::all() {
            weights[tag.index()] = tag.default_weight();
        }
        Self { weights }
    }
}

impl WeightTable {
    /// Overrides the weight of a revenue tag.
    pub fn with(mut self, tag: ScoreTag, weight: u64) -> Result<Self> {
        if !tag.is_revenue() {
            return Err(Error::NotRevenue(tag));
        }
        self.weights[tag.index()] = weight;
        Ok(self)
    }

    #[inline]
    pub fn weight(&self, tag: ScoreTag) -> u64 {
        self.weights[tag.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_wire_names() {
        for tag in ScoreTag::all() {
            assert_eq!(ScoreTag::parse(tag.as_str()).ok(), Some(tag));
        }
        assert_eq!(ScoreTag::DnsResolve.as_str(), "DNSResolve");
        assert_eq!(ScoreTag::PostTipFail.to_string(), "post-tip-fail");
    }

    #[test]
    fn unknown_tag_is_rejected() {
        match ScoreTag::parse("post-tip-failed") {
            Err(Error::UnknownTag(name)) => assert_eq!(name, "post-tip-failed"),
            other => panic!("expected unknown tag error, got {other:?}"),
        }
    }

    #[test]
    fn weights_only_apply_to_revenue_tags() {
        let table = WeightTable::default();
        assert_eq!(table.weight(ScoreTag::Tip), 1);
        assert_eq!(table.weight(ScoreTag::Reservation), 10);
        assert_eq!(table.weight(ScoreTag::PostTip), 0);

        assert!(matches!(
            WeightTable::default().with(ScoreTag::TooSlow, 5),
            Err(Error::NotRevenue(ScoreTag::TooSlow))
        ));

        let table = WeightTable::default()
            .with(ScoreTag::Reservation, 3)
            .unwrap_or_else(|e| panic!("revenue tag weight: {e}"));
        assert_eq!(table.weight(ScoreTag::Reservation), 3);
    }
}
