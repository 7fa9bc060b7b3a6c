//! Article-number assignment inside the catalog group of a matched heading.
//!
//! Each similarity group is decided once through its representative. The
//! categorizer only ever sees the articles listed under the group's heading,
//! and its answer is checked against that list before it is accepted.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::catalog::CatalogMapping;
use super::categorize::{CatalogEntry, CategorizationOutcome, Categorizer, categorize};
use super::dedup::SimilarityGroup;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Assigned,
    NoHeading,
    EmptyGroup,
    NoMatch,
    Rejected,
    Failed,
}

impl ArticleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::NoHeading => "no_heading",
            Self::EmptyGroup => "empty_group",
            Self::NoMatch => "no_match",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "assigned" => Some(Self::Assigned),
            "no_heading" => Some(Self::NoHeading),
            "empty_group" => Some(Self::EmptyGroup),
            "no_match" => Some(Self::NoMatch),
            "rejected" => Some(Self::Rejected),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Outcome for one customer row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleAssignment {
    pub row_index: usize,
    pub representative_index: usize,
    pub heading_key: Option<String>,
    pub article_number: Option<String>,
    pub status: ArticleStatus,
    pub failure: Option<String>,
}

/// Per-representative tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArticleCounts {
    pub representatives: usize,
    pub assigned: usize,
    pub no_heading: usize,
    pub empty_group: usize,
    pub no_match: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl ArticleCounts {
    fn record(&mut self, status: ArticleStatus) {
        self.representatives += 1;
        match status {
            ArticleStatus::Assigned => self.assigned += 1,
            ArticleStatus::NoHeading => self.no_heading += 1,
            ArticleStatus::EmptyGroup => self.empty_group += 1,
            ArticleStatus::NoMatch => self.no_match += 1,
            ArticleStatus::Rejected => self.rejected += 1,
            ArticleStatus::Failed => self.failed += 1,
        }
    }

    pub fn failures(&self) -> usize {
        self.rejected + self.failed
    }
}

struct Decision {
    heading_key: Option<String>,
    article_number: Option<String>,
    status: ArticleStatus,
    failure: Option<String>,
}

/// Decides every group and fans the result out to its members.
///
/// `texts` holds the description of each representative; `articles` maps a
/// heading key to the articles listed under it. The result has one entry per
/// group member, ordered by row index.
pub fn assign_articles(
    groups: &[SimilarityGroup],
    mappings: &[CatalogMapping],
    texts: &HashMap<usize, String>,
    articles: &BTreeMap<String, Vec<CatalogEntry>>,
    categorizer: &dyn Categorizer,
) -> (Vec<ArticleAssignment>, ArticleCounts) {
    let heading_of = mappings
        .iter()
        .map(|mapping| (mapping.representative_index, mapping.heading_key.as_deref()))
        .collect::<HashMap<_, _>>();

    let mut counts = ArticleCounts::default();
    let mut assignments = Vec::new();
    for group in groups {
        let representative = group.representative_index;
        let heading = heading_of.get(&representative).copied().flatten();
        let decision = decide(
            heading,
            texts.get(&representative).map(String::as_str).unwrap_or_default(),
            articles,
            categorizer,
        );
        counts.record(decision.status);

        for row_index in group.members() {
            assignments.push(ArticleAssignment {
                row_index,
                representative_index: representative,
                heading_key: decision.heading_key.clone(),
                article_number: decision.article_number.clone(),
                status: decision.status,
                failure: decision.failure.clone(),
            });
        }
    }

    assignments.sort_by_key(|assignment| assignment.row_index);
    (assignments, counts)
}

fn decide(
    heading: Option<&str>,
    text: &str,
    articles: &BTreeMap<String, Vec<CatalogEntry>>,
    categorizer: &dyn Categorizer,
) -> Decision {
    let Some(heading) = heading else {
        return Decision {
            heading_key: None,
            article_number: None,
            status: ArticleStatus::NoHeading,
            failure: None,
        };
    };
    let mut decision = Decision {
        heading_key: Some(heading.to_string()),
        article_number: None,
        status: ArticleStatus::EmptyGroup,
        failure: None,
    };
    let Some(candidates) = articles.get(heading).filter(|group| !group.is_empty()) else {
        return decision;
    };

    match categorize(categorizer, text, candidates) {
        CategorizationOutcome::Matched(number) => {
            decision.status = ArticleStatus::Assigned;
            decision.article_number = Some(number);
        }
        CategorizationOutcome::NoMatch => decision.status = ArticleStatus::NoMatch,
        CategorizationOutcome::Rejected(answer) => {
            decision.status = ArticleStatus::Rejected;
            decision.failure = Some(format!(
                "{} answered '{answer}', not an article under heading {heading}",
                categorizer.name()
            ));
        }
        CategorizationOutcome::Failed(reason) => {
            decision.status = ArticleStatus::Failed;
            decision.failure = Some(reason);
        }
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::catalog::CatalogMethod;
    use crate::analysis::categorize::{KeywordCategorizer, NO_MATCH};
    use crate::errors::AnalysisError;

    fn article(number: &str, text: &str) -> CatalogEntry {
        CatalogEntry {
            key: number.to_string(),
            text: text.to_string(),
        }
    }

    fn catalog() -> BTreeMap<String, Vec<CatalogEntry>> {
        BTreeMap::from([
            (
                "01.".to_string(),
                vec![
                    article("FD-30", "Fire door T30"),
                    article("FD-90", "Fire door T90"),
                ],
            ),
            ("02.".to_string(), vec![article("K-50", "Gas boiler 50 kW")]),
            ("03.".to_string(), Vec::new()),
        ])
    }

    fn mapped(representative_index: usize, heading_key: Option<&str>) -> CatalogMapping {
        CatalogMapping {
            representative_index,
            heading_key: heading_key.map(str::to_string),
            score: 0.95,
            method: CatalogMethod::Embedding,
            failure: None,
        }
    }

    fn group(representative_index: usize, duplicate_indices: Vec<usize>) -> SimilarityGroup {
        SimilarityGroup {
            representative_index,
            duplicate_indices,
        }
    }

    /// Answers with whatever article number the description names.
    struct Echo;

    impl Categorizer for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn classify(&self, text: &str, _candidates: &[CatalogEntry]) -> Result<String, AnalysisError> {
            match text {
                "down" => Err(AnalysisError::external("echo", "unavailable")),
                "nothing" => Ok(NO_MATCH.to_string()),
                other => Ok(other.to_string()),
            }
        }
    }

    #[test]
    fn group_outcome_applies_to_every_member() {
        let groups = vec![group(0, vec![3]), group(1, Vec::new())];
        let mappings = vec![mapped(0, Some("01.")), mapped(1, Some("02."))];
        let texts = HashMap::from([(0, "FD-90".to_string()), (1, "K-50".to_string())]);

        let (assignments, counts) = assign_articles(&groups, &mappings, &texts, &catalog(), &Echo);

        let rows = assignments
            .iter()
            .map(|assignment| (assignment.row_index, assignment.article_number.as_deref()))
            .collect::<Vec<_>>();
        assert_eq!(rows, [(0, Some("FD-90")), (1, Some("K-50")), (3, Some("FD-90"))]);
        assert_eq!(assignments[2].representative_index, 0);
        assert_eq!(assignments[2].heading_key.as_deref(), Some("01."));
        assert_eq!(counts.representatives, 2);
        assert_eq!(counts.assigned, 2);
    }

    #[test]
    fn answers_outside_the_heading_group_are_rejected() {
        let groups = vec![group(0, Vec::new())];
        let mappings = vec![mapped(0, Some("01."))];
        let texts = HashMap::from([(0, "K-50".to_string())]);

        let (assignments, counts) = assign_articles(&groups, &mappings, &texts, &catalog(), &Echo);

        assert_eq!(assignments[0].status, ArticleStatus::Rejected);
        assert_eq!(assignments[0].article_number, None);
        assert!(assignments[0].failure.as_deref().unwrap().contains("K-50"));
        assert_eq!(counts.failures(), 1);
    }

    #[test]
    fn missing_heading_and_empty_groups_skip_the_categorizer() {
        let groups = vec![
            group(0, Vec::new()),
            group(1, Vec::new()),
            group(2, Vec::new()),
            group(4, Vec::new()),
        ];
        let mappings = vec![mapped(0, None), mapped(1, Some("03.")), mapped(2, Some("99."))];
        let texts = HashMap::from([(0, "down".to_string()), (1, "down".to_string())]);

        let (assignments, counts) = assign_articles(&groups, &mappings, &texts, &catalog(), &Echo);

        let statuses = assignments
            .iter()
            .map(|assignment| assignment.status)
            .collect::<Vec<_>>();
        assert_eq!(
            statuses,
            [
                ArticleStatus::NoHeading,
                ArticleStatus::EmptyGroup,
                ArticleStatus::EmptyGroup,
                ArticleStatus::NoHeading,
            ]
        );
        assert_eq!(counts.no_heading, 2);
        assert_eq!(counts.empty_group, 2);
        assert_eq!(counts.failures(), 0);
    }

    #[test]
    fn service_errors_and_no_match_are_kept_apart() {
        let groups = vec![group(0, Vec::new()), group(1, Vec::new())];
        let mappings = vec![mapped(0, Some("01.")), mapped(1, Some("01."))];
        let texts = HashMap::from([(0, "down".to_string()), (1, "nothing".to_string())]);

        let (assignments, counts) = assign_articles(&groups, &mappings, &texts, &catalog(), &Echo);

        assert_eq!(assignments[0].status, ArticleStatus::Failed);
        assert!(assignments[0].failure.as_deref().unwrap().contains("unavailable"));
        assert_eq!(assignments[1].status, ArticleStatus::NoMatch);
        assert_eq!(assignments[1].failure, None);
        assert_eq!((counts.failed, counts.no_match), (1, 1));
    }

    #[test]
    fn keyword_categorizer_picks_within_the_group() {
        let groups = vec![group(0, Vec::new())];
        let mappings = vec![mapped(0, Some("01."))];
        let texts = HashMap::from([(0, "Fire door | T90 | steel".to_string())]);
        let categorizer = KeywordCategorizer::new(0.2).unwrap();

        let (assignments, _) = assign_articles(&groups, &mappings, &texts, &catalog(), &categorizer);
        assert_eq!(assignments[0].article_number.as_deref(), Some("FD-90"));
    }

    #[test]
    fn status_names_round_trip() {
        for status in [
            ArticleStatus::Assigned,
            ArticleStatus::NoHeading,
            ArticleStatus::EmptyGroup,
            ArticleStatus::NoMatch,
            ArticleStatus::Rejected,
            ArticleStatus::Failed,
        ] {
            assert_eq!(ArticleStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ArticleStatus::parse("maybe"), None);
    }
}
