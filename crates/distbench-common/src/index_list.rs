//! Instance offset lists
//!
//! Worker and parameter-server lists in run configurations are offsets into
//! the instance pool. Configurations write them as a single integer, a YAML
//! sequence, or a string of comma-separated indices and inclusive ranges.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing an index list string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexListError {
    /// A token was not a non-negative integer
    #[error("invalid instance index '{0}'")]
    InvalidIndex(String),

    /// A range ran backwards
    #[error("invalid index range '{start}-{end}': start is greater than end")]
    ReversedRange { start: usize, end: usize },
}

/// Ordered list of instance offsets
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawIndexList", into = "Vec<usize>")]
pub struct IndexList(Vec<usize>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIndexList {
    Single(usize),
    Many(Vec<usize>),
    Text(String),
}

impl TryFrom<RawIndexList> for IndexList {
    type Error = IndexListError;

    fn try_from(raw: RawIndexList) -> Result<Self, Self::Error> {
        match raw {
            RawIndexList::Single(i) => Ok(Self(vec![i])),
            RawIndexList::Many(v) => Ok(Self(v)),
            RawIndexList::Text(s) => s.parse(),
        }
    }
}

impl From<IndexList> for Vec<usize> {
    fn from(list: IndexList) -> Self {
        list.0
    }
}

impl From<Vec<usize>> for IndexList {
    fn from(v: Vec<usize>) -> Self {
        Self(v)
    }
}

impl std::str::FromStr for IndexList {
    type Err = IndexListError;

    /// Parse `"0,1,2"`, `"0-3"` or a mix such as `"0,2-4"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = Vec::new();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if let Some((start, end)) = token.split_once('-') {
                let start = parse_index(start)?;
                let end = parse_index(end)?;
                if start > end {
                    return Err(IndexListError::ReversedRange { start, end });
                }
                out.extend(start..=end);
            } else {
                out.push(parse_index(token)?);
            }
        }
        Ok(Self(out))
    }
}

fn parse_index(token: &str) -> Result<usize, IndexListError> {
    token
        .trim()
        .parse()
        .map_err(|_| IndexListError::InvalidIndex(token.trim().to_string()))
}

impl IndexList {
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// First index that appears more than once, if any
    pub fn first_duplicate(&self) -> Option<usize> {
        let mut seen = std::collections::HashSet::new();
        self.0.iter().copied().find(|i| !seen.insert(*i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_comma_list() {
        let list: IndexList = "0, 1,2".parse().unwrap();
        assert_eq!(list.as_slice(), &[0, 1, 2]);
    }

    #[test]
    fn test_parse_ranges() {
        let list: IndexList = "0,2-4".parse().unwrap();
        assert_eq!(list.as_slice(), &[0, 2, 3, 4]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "0,x".parse::<IndexList>(),
            Err(IndexListError::InvalidIndex("x".to_string()))
        );
        assert_eq!(
            "4-1".parse::<IndexList>(),
            Err(IndexListError::ReversedRange { start: 4, end: 1 })
        );
    }

    #[test]
    fn test_yaml_forms() {
        let single: IndexList = serde_yaml::from_str("2").unwrap();
        assert_eq!(single.as_slice(), &[2]);

        let seq: IndexList = serde_yaml::from_str("[1, 0]").unwrap();
        assert_eq!(seq.as_slice(), &[1, 0]);

        let text: IndexList = serde_yaml::from_str("'0-2'").unwrap();
        assert_eq!(text.as_slice(), &[0, 1, 2]);

        // Always written back as a sequence
        let yaml = serde_yaml::to_string(&text).unwrap();
        assert_eq!(yaml.trim(), "- 0\n- 1\n- 2");
    }

    #[test]
    fn test_first_duplicate() {
        assert_eq!(IndexList::from(vec![0, 1, 2]).first_duplicate(), None);
        assert_eq!(IndexList::from(vec![0, 1, 0]).first_duplicate(), Some(0));
    }
}
