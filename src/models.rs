use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque user identifier supplied by the ingestion layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        UserId(value)
    }
}

/// Sport classification. Informational only; loads never depend on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sport {
    Running,
    TrailRunning,
    Cycling,
    Swimming,
    Walking,
    Hiking,
    Rowing,
    CrossTraining,
    #[default]
    Other,
}

/// Biological sex as reported by the profile service; selects the HR weighting curve
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
    #[default]
    Unspecified,
}

/// Individual heart rate sample in a recorded stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HrSample {
    /// Seconds from activity start
    pub offset_seconds: u32,

    /// Heart rate in beats per minute
    pub bpm: u16,
}

/// Raw activity as delivered by ingestion, already deduplicated and user-attributed.
/// Never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Unique identifier for the activity
    pub id: String,

    /// Calendar date the activity counts towards
    pub date: NaiveDate,

    /// Sport/activity type
    #[serde(default)]
    pub sport: Sport,

    /// Duration of the activity in seconds
    pub duration_seconds: u32,

    /// Distance in kilometres
    #[serde(default)]
    pub distance_km: Option<Decimal>,

    /// Total elevation gain in metres
    #[serde(default)]
    pub elevation_gain_m: Option<Decimal>,

    /// Timestamped heart rate stream
    #[serde(default)]
    pub hr_samples: Option<Vec<HrSample>>,

    /// Average heart rate reported by the device
    #[serde(default)]
    pub avg_hr: Option<u16>,
}

impl Activity {
    /// Number of samples in the HR stream, zero when absent
    pub fn sample_count(&self) -> usize {
        self.hr_samples.as_ref().map(|s| s.len()).unwrap_or(0)
    }

    /// True when neither a stream nor an average heart rate is present
    pub fn has_no_hr(&self) -> bool {
        self.sample_count() == 0 && self.avg_hr.is_none()
    }
}

/// User profile supplied by the profile service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Unique user identifier
    pub user_id: UserId,

    /// Resting heart rate
    #[serde(default)]
    pub resting_hr: Option<u16>,

    /// Maximum heart rate
    #[serde(default)]
    pub max_hr: Option<u16>,

    /// Sex, selects the exponential weighting curve
    #[serde(default)]
    pub sex: Sex,

    /// Raw tier name; unknown names resolve to the default tier
    #[serde(default)]
    pub risk_tolerance_tier: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        UserProfile {
            user_id: user_id.into(),
            resting_hr: None,
            max_hr: None,
            sex: Sex::default(),
            risk_tolerance_tier: None,
        }
    }
}

/// How the internal load of an activity or day was obtained.
///
/// Ordered from weakest to strongest so a day can report the weakest
/// method among its HR-bearing activities with `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationMethod {
    Unavailable,
    Average,
    Stream,
}

impl fmt::Display for CalculationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CalculationMethod::Unavailable => "unavailable",
            CalculationMethod::Average => "average",
            CalculationMethod::Stream => "stream",
        };
        f.write_str(label)
    }
}

/// All raw input for one user's pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserHistory {
    pub profile: UserProfile,
    pub activities: Vec<Activity>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sport_enum_serialization() {
        let sport = Sport::TrailRunning;
        let json = serde_json::to_string(&sport).unwrap();
        assert_eq!(json, "\"TrailRunning\"");

        let deserialized: Sport = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, Sport::TrailRunning);
    }

    #[test]
    fn test_calculation_method_ordering() {
        assert!(CalculationMethod::Unavailable < CalculationMethod::Average);
        assert!(CalculationMethod::Average < CalculationMethod::Stream);
        assert_eq!(
            serde_json::to_string(&CalculationMethod::Stream).unwrap(),
            "\"stream\""
        );
    }

    #[test]
    fn test_activity_defaults_from_json() {
        let json = r#"{"id":"a1","date":"2024-05-01","duration_seconds":1800,"distance_km":"5.2"}"#;
        let activity: Activity = serde_json::from_str(json).unwrap();

        assert_eq!(activity.sport, Sport::Other);
        assert_eq!(activity.distance_km, Some(dec!(5.2)));
        assert!(activity.has_no_hr());
        assert_eq!(activity.sample_count(), 0);
        assert_eq!(UserProfile::new("u").sex, Sex::Unspecified);
    }

    #[test]
    fn test_user_id_transparent() {
        let id = UserId::from("runner-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"runner-1\"");
        assert_eq!(id.to_string(), "runner-1");
    }
}
