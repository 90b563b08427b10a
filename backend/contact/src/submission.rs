use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub const MAX_TAGS: usize = 20;
pub const MAX_TAG_LEN: usize = 50;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    #[default]
    New,
    Read,
    Replied,
    Archived,
}

impl SubmissionStatus {
    pub const ALL: [SubmissionStatus; 4] = [Self::New, Self::Read, Self::Replied, Self::Archived];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Read => "read",
            Self::Replied => "replied",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status `{s}`"))
    }
}

/// Admin-assigned urgency, 1 (lowest) to 5 (highest).
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;

        Priority::new(value).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "priority must be between {} and {}",
                Priority::MIN,
                Priority::MAX
            ))
        })
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl Submission {
    /// Applies only the fields present in `patch`.
    pub fn apply(&mut self, patch: &SubmissionPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }

        if let Some(priority) = patch.priority {
            self.priority = priority;
        }

        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }

        self.updated_at = now;
    }
}

/// Partial admin update.
///
/// `priority` distinguishes "leave alone" (absent) from "clear" (`null`).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SubmissionStatus>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<Option<Priority>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl SubmissionPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.priority.is_none() && self.tags.is_none()
    }

    /// Trims and dedups tags, rejecting oversized ones.
    pub fn normalize(mut self) -> Result<Self, String> {
        if let Some(tags) = self.tags.take() {
            let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());

            for tag in tags {
                let tag = tag.trim().to_string();

                if tag.is_empty() || cleaned.contains(&tag) {
                    continue;
                }

                if tag.chars().count() > MAX_TAG_LEN {
                    return Err(format!("tags must be at most {MAX_TAG_LEN} characters"));
                }

                cleaned.push(tag);
            }

            if cleaned.len() > MAX_TAGS {
                return Err(format!("at most {MAX_TAGS} tags are allowed"));
            }

            self.tags = Some(cleaned);
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Submission {
        let now = Utc::now();

        Submission {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            subject: "Hello".into(),
            message: "A message long enough".into(),
            created_at: now,
            updated_at: now,
            status: SubmissionStatus::New,
            priority: Some(Priority::new(3).unwrap()),
            tags: vec!["lead".into()],
            source: None,
            user_agent: None,
            ip: None,
        }
    }

    #[test]
    fn test_priority_bounds() {
        assert!(Priority::new(0).is_none());
        assert!(Priority::new(6).is_none());
        assert_eq!(Priority::new(5).map(|p| p.get()), Some(5));

        assert!(serde_json::from_str::<Priority>("9").is_err());
        assert_eq!(serde_json::from_str::<Priority>("2").unwrap().get(), 2);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("replied".parse::<SubmissionStatus>(), Ok(SubmissionStatus::Replied));
        assert!("done".parse::<SubmissionStatus>().is_err());
        assert_eq!(serde_json::to_string(&SubmissionStatus::Archived).unwrap(), "\"archived\"");
    }

    #[test]
    fn test_patch_distinguishes_null_from_absent() {
        let absent: SubmissionPatch = serde_json::from_str(r#"{"status":"read"}"#).unwrap();
        assert_eq!(absent.priority, None);

        let cleared: SubmissionPatch = serde_json::from_str(r#"{"priority":null}"#).unwrap();
        assert_eq!(cleared.priority, Some(None));
        assert!(!cleared.is_empty());
    }

    #[test]
    fn test_apply_only_touches_requested_fields() {
        let mut submission = sample();
        let before = submission.clone();

        let patch = SubmissionPatch {
            status: Some(SubmissionStatus::Read),
            ..Default::default()
        };
        submission.apply(&patch, Utc::now());

        assert_eq!(submission.status, SubmissionStatus::Read);
        assert_eq!(submission.priority, before.priority);
        assert_eq!(submission.tags, before.tags);
        assert_eq!(submission.message, before.message);

        submission.apply(
            &SubmissionPatch {
                priority: Some(None),
                ..Default::default()
            },
            Utc::now(),
        );
        assert_eq!(submission.priority, None);
        assert_eq!(submission.status, SubmissionStatus::Read);
    }

    #[test]
    fn test_normalize_tags() {
        let patch = SubmissionPatch {
            tags: Some(vec![" work ".into(), "work".into(), "".into(), "urgent".into()]),
            ..Default::default()
        };

        let patch = patch.normalize().unwrap();
        assert_eq!(patch.tags, Some(vec!["work".to_string(), "urgent".to_string()]));

        let too_long = SubmissionPatch {
            tags: Some(vec!["x".repeat(MAX_TAG_LEN + 1)]),
            ..Default::default()
        };
        assert!(too_long.normalize().is_err());
    }
}
