use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which indicators of a source a request covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorSelection {
    All,
    Codes(Vec<String>),
}

impl IndicatorSelection {
    pub fn codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IndicatorSelection::Codes(codes.into_iter().map(Into::into).collect())
    }
}

impl FromStr for IndicatorSelection {
    type Err = String;

    /// `all` or a comma separated list of codes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(IndicatorSelection::All);
        }
        let codes: Vec<String> = s
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        if codes.is_empty() {
            return Err("empty indicator list".into());
        }
        Ok(IndicatorSelection::Codes(codes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_and_lists() {
        assert_eq!("ALL".parse::<IndicatorSelection>().unwrap(), IndicatorSelection::All);
        assert_eq!(
            "ipca, selic".parse::<IndicatorSelection>().unwrap(),
            IndicatorSelection::codes(["ipca", "selic"])
        );
        assert!(" , ".parse::<IndicatorSelection>().is_err());
    }
}
