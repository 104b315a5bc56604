use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named collection inside a `Store`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Sessions,
    Investments,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Investments => "investments",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sessions" => Ok(Self::Sessions),
            "investments" => Ok(Self::Investments),
            _ => Err(format!("Invalid collection: {}", s)),
        }
    }
}

/// A typed document persisted in one collection, keyed by a string id.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn id(&self) -> &str;
}

/// Index into a session's image pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ImageIdx {
    First,
    Second,
}

impl ImageIdx {
    pub fn as_usize(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }

    /// The index that is not `self`.
    pub fn other(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }
}

impl TryFrom<u8> for ImageIdx {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::First),
            1 => Ok(Self::Second),
            _ => Err(format!("Invalid image index: {}", value)),
        }
    }
}

impl From<ImageIdx> for u8 {
    fn from(idx: ImageIdx) -> Self {
        idx.as_usize() as u8
    }
}

impl std::fmt::Display for ImageIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_usize())
    }
}

/// Lifecycle state of a session. Variants are declared in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    New,
    Unjudged,
    Judged,
    Investing,
    Invested,
    #[serde(rename = "resolved")]
    InvestmentResolved,
    #[serde(rename = "shown")]
    ShownFeedback,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 7] = [
        Self::New,
        Self::Unjudged,
        Self::Judged,
        Self::Investing,
        Self::Invested,
        Self::InvestmentResolved,
        Self::ShownFeedback,
    ];

    /// Statuses the reconciliation sweep drives forward without user input.
    pub const SWEEPABLE: [SessionStatus; 4] = [
        Self::Unjudged,
        Self::Judged,
        Self::Investing,
        Self::Invested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Unjudged => "unjudged",
            Self::Judged => "judged",
            Self::Investing => "investing",
            Self::Invested => "invested",
            Self::InvestmentResolved => "resolved",
            Self::ShownFeedback => "shown",
        }
    }

    pub fn next(&self) -> Option<SessionStatus> {
        match self {
            Self::New => Some(Self::Unjudged),
            Self::Unjudged => Some(Self::Judged),
            Self::Judged => Some(Self::Investing),
            Self::Investing => Some(Self::Invested),
            Self::Invested => Some(Self::InvestmentResolved),
            Self::InvestmentResolved => Some(Self::ShownFeedback),
            Self::ShownFeedback => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }

    /// Sessions in these statuses count towards win/loss statistics.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::InvestmentResolved | Self::ShownFeedback)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid session status: {}", s))
    }
}

/// One round of the game, from creation to feedback shown.
///
/// Serialized as a flat camelCase record; `data` belongs to whichever
/// investment backend wrote it and is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub images: [String; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impression_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_image_idx: Option<ImageIdx>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_image_idx: Option<ImageIdx>,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(id: impl Into<String>, images: [String; 2]) -> Self {
        Self {
            id: id.into(),
            images,
            impression_text: None,
            chosen_image_idx: None,
            target_image_idx: None,
            data: Map::new(),
            status: SessionStatus::New,
        }
    }

    pub fn image(&self, idx: ImageIdx) -> &str {
        &self.images[idx.as_usize()]
    }

    /// Whether the wager picked the image the judge chose. `None` until resolved.
    pub fn is_win(&self) -> Option<bool> {
        match (self.chosen_image_idx, self.target_image_idx) {
            (Some(chosen), Some(target)) => Some(chosen == target),
            _ => None,
        }
    }
}

impl Record for Session {
    const COLLECTION: Collection = Collection::Sessions;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Wagering strategy selected by the judged image index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    BackFavourite,
    LayFavourite,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BackFavourite => "back_favourite",
            Self::LayFavourite => "lay_favourite",
        }
    }

    pub fn is_lay(&self) -> bool {
        matches!(self, Self::LayFavourite)
    }
}

impl From<ImageIdx> for Strategy {
    fn from(idx: ImageIdx) -> Self {
        match idx {
            ImageIdx::First => Self::BackFavourite,
            ImageIdx::Second => Self::LayFavourite,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    Pending,
    Active,
    Completed,
}

impl InvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for InvestmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway-owned wager record, one per session (id = session id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentRecord {
    pub id: String,
    pub provider: String,
    pub strategy_idx: ImageIdx,
    pub strategy: Strategy,
    pub status: InvestmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub won: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_idx: Option<ImageIdx>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Record for InvestmentRecord {
    const COLLECTION: Collection = Collection::Investments;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Aggregate win/loss figures over resolved sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_sessions: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> [String; 2] {
        ["a.jpg".to_string(), "b.jpg".to_string()]
    }

    #[test]
    fn test_status_roundtrips_through_str() {
        for status in SessionStatus::ALL {
            assert_eq!(SessionStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(SessionStatus::from_str("pending").is_err());
    }

    #[test]
    fn test_status_sequence_is_linear() {
        let mut walked = vec![SessionStatus::New];
        while let Some(next) = walked.last().unwrap().next() {
            assert!(next > *walked.last().unwrap());
            walked.push(next);
        }
        assert_eq!(walked, SessionStatus::ALL.to_vec());
        assert!(SessionStatus::ShownFeedback.is_terminal());
        assert!(!SessionStatus::InvestmentResolved.is_terminal());
    }

    #[test]
    fn test_status_serializes_to_short_names() {
        assert_eq!(
            serde_json::to_value(SessionStatus::InvestmentResolved).unwrap(),
            "resolved"
        );
        assert_eq!(
            serde_json::to_value(SessionStatus::ShownFeedback).unwrap(),
            "shown"
        );
        assert_eq!(serde_json::to_value(SessionStatus::Unjudged).unwrap(), "unjudged");
    }

    #[test]
    fn test_image_idx_other_and_bounds() {
        assert_eq!(ImageIdx::First.other(), ImageIdx::Second);
        assert_eq!(ImageIdx::Second.other(), ImageIdx::First);
        assert!(ImageIdx::try_from(2u8).is_err());
        assert!(serde_json::from_value::<ImageIdx>(serde_json::json!(-1)).is_err());
    }

    #[test]
    fn test_new_session_layout_is_flat_camel_case() {
        let session = Session::new("s1", pair());
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["id"], "s1");
        assert_eq!(value["images"], serde_json::json!(["a.jpg", "b.jpg"]));
        assert_eq!(value["status"], "new");
        assert!(value.get("impressionText").is_none());
        assert!(value.get("chosenImageIdx").is_none());
    }

    #[test]
    fn test_session_reads_record_without_data_bag() {
        let session: Session = serde_json::from_value(serde_json::json!({
            "id": "s2",
            "images": ["x.png", "y.png"],
            "impressionText": "water",
            "chosenImageIdx": 1,
            "status": "judged"
        }))
        .unwrap();
        assert_eq!(session.chosen_image_idx, Some(ImageIdx::Second));
        assert!(session.data.is_empty());
        assert_eq!(session.image(ImageIdx::Second), "y.png");
    }

    #[test]
    fn test_is_win() {
        let mut session = Session::new("s3", pair());
        assert_eq!(session.is_win(), None);
        session.chosen_image_idx = Some(ImageIdx::First);
        session.target_image_idx = Some(ImageIdx::First);
        assert_eq!(session.is_win(), Some(true));
        session.target_image_idx = Some(ImageIdx::Second);
        assert_eq!(session.is_win(), Some(false));
    }

    #[test]
    fn test_strategy_follows_image_index() {
        assert_eq!(Strategy::from(ImageIdx::First), Strategy::BackFavourite);
        assert!(Strategy::from(ImageIdx::Second).is_lay());
    }
}
