//! Candidate pool assembly: union fuzzy-ambiguous rows with vector-recall
//! hits, rank by composite similarity, cap to top-K.

use strsim::jaro_winkler;

use websift_common::RejectionReason;

use crate::canonical::CanonicalRow;

/// Company pools keep at most this many candidates per decision.
const COMPANY_TOP_K: usize = 5;
/// Entity pools are smaller; the prompts carry full candidate lists.
const ENTITY_TOP_K: usize = 3;
/// Company candidates scoring at or below this are noise.
const COMPANY_SCORE_FLOOR: f64 = 0.3;
/// Entity candidates below this title similarity are dropped.
const ENTITY_SCORE_FLOOR: f64 = 0.6;
/// Entity candidates above this are so close the LLM is not consulted.
const ENTITY_SHORTCUT: f64 = 0.9;

/// An accepted row considered against a new ambiguous row.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub row: CanonicalRow,
    pub score: f64,
}

/// Result of entity-mode pool assembly: either a deterministic rejection
/// (a candidate cleared the shortcut threshold) or the ranked pool.
#[derive(Debug)]
pub enum EntityPool {
    Reject {
        existing: CanonicalRow,
        reason: RejectionReason,
        similarity: f64,
    },
    Candidates(Vec<Candidate>),
}

/// Rank company candidates: `0.6·name + 0.2·domain + 0.2·brand`.
pub fn rank_company(new: &CanonicalRow, pool: Vec<CanonicalRow>) -> Vec<Candidate> {
    let new_name = new.name.to_lowercase();
    let mut ranked: Vec<Candidate> = pool
        .into_iter()
        .map(|row| {
            let name_sim = if new_name.is_empty() || row.name.is_empty() {
                0.0
            } else {
                jaro_winkler(&new_name, &row.name.to_lowercase())
            };
            let domain_eq = if !new.etld1.is_empty() && new.etld1 == row.etld1 {
                1.0
            } else {
                0.0
            };
            let brand_eq = if !new.brand.is_empty() && new.brand == row.brand {
                1.0
            } else {
                0.0
            };
            let score = 0.6 * name_sim + 0.2 * domain_eq + 0.2 * brand_eq;
            Candidate { row, score }
        })
        .filter(|c| c.score > COMPANY_SCORE_FLOOR)
        .collect();

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(COMPANY_TOP_K);
    ranked
}

/// Rank entity candidates by normalized-title similarity. `fuzzy_pool`
/// candidates above the shortcut threshold reject outright as
/// `entity_very_high_similarity`; vector-recall candidates above it reject
/// as `high_similarity_match`.
pub fn rank_entity(
    new: &CanonicalRow,
    fuzzy_pool: Vec<CanonicalRow>,
    vector_pool: Vec<CanonicalRow>,
) -> EntityPool {
    let mut ranked: Vec<Candidate> = Vec::new();

    for (rows, shortcut_reason) in [
        (fuzzy_pool, RejectionReason::EntityVeryHighSimilarity),
        (vector_pool, RejectionReason::HighSimilarityMatch),
    ] {
        for row in rows {
            if ranked.iter().any(|c| c.row.row_id == row.row_id) {
                continue;
            }
            let score = if new.normalized_title.is_empty() || row.normalized_title.is_empty() {
                0.0
            } else {
                jaro_winkler(&new.normalized_title, &row.normalized_title)
            };
            if score > ENTITY_SHORTCUT {
                return EntityPool::Reject {
                    existing: row,
                    reason: shortcut_reason,
                    similarity: score,
                };
            }
            if score >= ENTITY_SCORE_FLOOR {
                ranked.push(Candidate { row, score });
            }
        }
    }

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(ENTITY_TOP_K);
    EntityPool::Candidates(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize;
    use serde_json::json;
    use websift_common::DedupMode;

    fn company(id: &str, name: &str, url: &str) -> CanonicalRow {
        canonicalize(&json!({"id": id, "name": name, "url": url}), DedupMode::Company)
    }

    fn entity(id: &str, title: &str, url: &str) -> CanonicalRow {
        canonicalize(&json!({"id": id, "title": title, "url": url}), DedupMode::Entity)
    }

    #[test]
    fn company_ranking_prefers_same_domain_and_brand() {
        let new = company("n", "JD", "https://jd.hk");
        let pool = vec![
            company("a", "JD", "https://jd.com"),
            company("b", "Alibaba", "https://alibaba.com"),
        ];
        let ranked = rank_company(&new, pool);
        assert_eq!(ranked.len(), 1, "unrelated candidate should fall below floor");
        assert_eq!(ranked[0].row.row_id, "a");
        // name 1.0 and brand match, different etld1.
        assert!(ranked[0].score > 0.7, "score {}", ranked[0].score);
    }

    #[test]
    fn company_ranking_caps_to_top_five() {
        let new = company("n", "Acme", "https://acme.com");
        let pool: Vec<CanonicalRow> = (0..8)
            .map(|i| company(&format!("c{i}"), "Acme", &format!("https://acme{i}.io")))
            .collect();
        let ranked = rank_company(&new, pool);
        assert_eq!(ranked.len(), 5);
    }

    #[test]
    fn entity_shortcut_rejects_very_close_titles() {
        let new = entity("n", "District 9 The", "https://siteA.com/d9");
        let pool = vec![entity("a", "District 9", "https://siteB.com/d9")];
        match rank_entity(&new, pool, vec![]) {
            EntityPool::Reject {
                reason: RejectionReason::EntityVeryHighSimilarity,
                similarity,
                ..
            } => assert!(similarity > 0.9),
            other => panic!("expected shortcut rejection, got {other:?}"),
        }
    }

    #[test]
    fn entity_vector_hits_use_high_similarity_reason() {
        let new = entity("n", "District 9 The", "https://siteA.com/d9");
        let pool = vec![entity("a", "District 9", "https://siteB.com/d9")];
        match rank_entity(&new, vec![], pool) {
            EntityPool::Reject {
                reason: RejectionReason::HighSimilarityMatch,
                ..
            } => {}
            other => panic!("expected shortcut rejection, got {other:?}"),
        }
    }

    #[test]
    fn entity_pool_drops_weak_and_caps_to_three() {
        let new = entity("n", "The Expanse", "https://a.com/1");
        let pool = vec![
            entity("a", "The Expanse Books", "https://b.com/1"),
            entity("b", "Expanded Horizons", "https://c.com/1"),
            entity("c", "Totally Unrelated", "https://d.com/1"),
        ];
        if let EntityPool::Candidates(ranked) = rank_entity(&new, pool, vec![]) {
            assert!(ranked.len() <= 3);
            assert!(ranked.iter().all(|c| c.score >= 0.6));
            assert!(!ranked.iter().any(|c| c.row.row_id == "c"));
        } else {
            panic!("expected candidates");
        }
    }

    #[test]
    fn empty_pools_yield_empty_candidates() {
        let new = entity("n", "Alien", "https://a.com/1");
        match rank_entity(&new, vec![], vec![]) {
            EntityPool::Candidates(c) => assert!(c.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
