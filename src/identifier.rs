//! The identifier of a C-GET request.
#![allow(non_snake_case)]

use std::fmt::Display;
use std::str::FromStr;

use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use regex::Regex;

/// The level of the DICOM information model a retrieval is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RetrieveLevel {
    Patient,
    Study,
    Series,
    Image,
}

impl RetrieveLevel {
    /// The unique key of this level.
    pub fn unique_key(&self) -> Tag {
        match self {
            Self::Patient => tags::PATIENT_ID,
            Self::Study => tags::STUDY_INSTANCE_UID,
            Self::Series => tags::SERIES_INSTANCE_UID,
            Self::Image => tags::SOP_INSTANCE_UID,
        }
    }

    /// The level at which `tag` is a matching key, if it is one.
    pub fn of_key(tag: Tag) -> Option<Self> {
        MATCHING_KEYS
            .iter()
            .find(|(key, _)| *key == tag)
            .map(|(_, level)| *level)
    }
}

impl FromStr for RetrieveLevel {
    type Err = MalformedRequest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches(['\0', ' ']).trim_start() {
            "PATIENT" => Ok(Self::Patient),
            "STUDY" => Ok(Self::Study),
            "SERIES" => Ok(Self::Series),
            "IMAGE" => Ok(Self::Image),
            other => Err(MalformedRequest::UnknownLevel(other.to_string())),
        }
    }
}

impl Display for RetrieveLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Patient => "PATIENT",
            Self::Study => "STUDY",
            Self::Series => "SERIES",
            Self::Image => "IMAGE",
        })
    }
}

/// Attributes which can be used to select instances, and the level they belong to.
const MATCHING_KEYS: [(Tag, RetrieveLevel); 4] = [
    (tags::PATIENT_ID, RetrieveLevel::Patient),
    (tags::STUDY_INSTANCE_UID, RetrieveLevel::Study),
    (tags::SERIES_INSTANCE_UID, RetrieveLevel::Series),
    (tags::SOP_INSTANCE_UID, RetrieveLevel::Image),
];

/// The Query/Retrieve Level of the request is missing or not one of the levels of the
/// information model.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedRequest {
    #[error("QueryRetrieveLevel is missing")]
    MissingLevel,
    #[error("Unknown QueryRetrieveLevel \"{0}\"")]
    UnknownLevel(String),
}

/// One matching key of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchingKey {
    pub tag: Tag,
    pub value: String,
}

impl MatchingKey {
    pub fn new(tag: Tag, value: impl Into<String>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    /// Prepare this key for testing the attribute values of stored instances.
    ///
    /// - An empty key matches anything.
    /// - A value containing backslashes is a list of UIDs, any of which may match.
    /// - `*` and `?` are wildcards for any sequence of characters and any single character.
    /// - Otherwise, the values must be equal.
    ///
    /// <https://dicom.nema.org/medical/dicom/current/output/chtml/part04/sect_C.2.2.2.html>
    pub fn matcher(&self) -> KeyMatcher {
        let key = trim(&self.value);
        if key.is_empty() || key == "*" {
            KeyMatcher::Any
        } else if key.contains('\\') {
            KeyMatcher::List(key.split('\\').map(|uid| trim(uid).to_string()).collect())
        } else if key.contains(['*', '?']) {
            wildcard_regex(key).map_or(KeyMatcher::Nothing, KeyMatcher::Pattern)
        } else {
            KeyMatcher::Exact(key.to_string())
        }
    }

    /// Whether this key matches any value, i.e. it is empty or a lone `*`.
    pub fn is_universal(&self) -> bool {
        matches!(trim(&self.value), "" | "*")
    }
}

/// A [MatchingKey] ready to be tested against many values.
#[derive(Debug, Clone)]
pub enum KeyMatcher {
    Any,
    Nothing,
    Exact(String),
    List(Vec<String>),
    Pattern(Regex),
}

impl KeyMatcher {
    /// Whether an attribute value of a stored instance matches.
    pub fn matches(&self, value: &str) -> bool {
        let value = trim(value);
        match self {
            Self::Any => true,
            Self::Nothing => false,
            Self::Exact(key) => key == value,
            Self::List(uids) => uids.iter().any(|uid| uid == value),
            Self::Pattern(re) => re.is_match(value),
        }
    }
}

fn trim(s: &str) -> &str {
    s.trim_matches(|c: char| c == '\0' || c.is_whitespace())
}

fn wildcard_regex(pattern: &str) -> Option<Regex> {
    let body: String = pattern
        .chars()
        .map(|c| match c {
            '*' => ".*".to_string(),
            '?' => ".".to_string(),
            c => regex::escape(&c.to_string()),
        })
        .collect();
    Regex::new(&format!("^{body}$")).ok()
}

/// The identifier data set of a C-GET-RQ.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrieveIdentifier {
    /// The raw value of QueryRetrieveLevel, if present.
    pub QueryRetrieveLevel: Option<String>,
    pub keys: Vec<MatchingKey>,
}

impl RetrieveIdentifier {
    pub fn new(level: RetrieveLevel, keys: impl IntoIterator<Item = MatchingKey>) -> Self {
        Self {
            QueryRetrieveLevel: Some(level.to_string()),
            keys: keys.into_iter().collect(),
        }
    }

    /// Read the Query/Retrieve Level and the matching keys from an identifier data set.
    ///
    /// This never fails: a missing or invalid level is reported by [RetrieveIdentifier::level].
    pub fn from_dataset(dcm: &InMemDicomObject) -> Self {
        let QueryRetrieveLevel = dcm
            .element(tags::QUERY_RETRIEVE_LEVEL)
            .ok()
            .and_then(|e| e.string().ok())
            .map(|s| trim(s).to_string())
            .filter(|s| !s.is_empty());
        let keys = MATCHING_KEYS
            .iter()
            .filter_map(|(tag, _)| {
                dcm.element(*tag)
                    .ok()
                    .and_then(|e| e.to_str().ok())
                    .map(|value| MatchingKey::new(*tag, trim(&value)))
            })
            .collect();
        Self {
            QueryRetrieveLevel,
            keys,
        }
    }

    /// Get the level of this request.
    pub fn level(&self) -> Result<RetrieveLevel, MalformedRequest> {
        self.QueryRetrieveLevel
            .as_deref()
            .ok_or(MalformedRequest::MissingLevel)?
            .parse()
    }

    /// Whether the unique key of `level` is present with a value which selects something.
    ///
    /// A C-GET must name what it retrieves at its own level.
    pub fn has_unique_key(&self, level: RetrieveLevel) -> bool {
        let unique_key = level.unique_key();
        self.keys
            .iter()
            .any(|key| key.tag == unique_key && !key.is_universal())
    }

    /// The matching keys which apply at the given level, i.e. keys of that level or above it.
    pub fn keys_in_scope(&self, level: RetrieveLevel) -> impl Iterator<Item = &MatchingKey> {
        self.keys.iter().filter(move |key| {
            RetrieveLevel::of_key(key.tag).is_some_and(|key_level| key_level <= level)
        })
    }
}
