//! Deterministic fuzzy classification of a (new, accepted) row pair.
//!
//! Rules run in a fixed order and shed the obvious duplicates and obvious
//! uniques cheaply; whatever lands in `Ambiguous` feeds the candidate pool
//! and, from there, the LLM adjudicator.

use strsim::{jaro, jaro_winkler};

use websift_common::{DedupMode, RejectionReason};

use crate::canonical::{CanonicalRow, SubdomainKind};

/// Company-mode name similarity above this is an outright duplicate.
const COMPANY_NAME_DUP: f64 = 0.95;
/// Entity-mode normalized-title similarity above this is a duplicate.
const ENTITY_TITLE_DUP: f64 = 0.92;
/// Video-platform band: above dup → duplicate, above amb → ambiguous.
const VIDEO_TITLE_DUP: f64 = 0.95;
const VIDEO_TITLE_AMB: f64 = 0.85;
/// Same-brand different-domain pairs with both sides specific need this
/// much name agreement to collapse without the LLM.
const BRAND_NAME_DUP: f64 = 0.8;
/// Names this short (and brands, for rule 3) are too ambiguous to match on.
const MIN_TOKEN_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum FuzzyVerdict {
    Duplicate {
        reason: RejectionReason,
        similarity: f64,
    },
    Unique,
    Ambiguous {
        similarity: f64,
    },
}

/// Classify a new row against one accepted row.
pub fn compare(new: &CanonicalRow, existing: &CanonicalRow, mode: DedupMode) -> FuzzyVerdict {
    // 1. Video-platform items compare by title alone. Plain Jaro keeps
    //    numbering variants ("Trailer #2") inside the adjudication band.
    if new.is_video_platform && existing.is_video_platform {
        if new.normalized_title.is_empty() || existing.normalized_title.is_empty() {
            return FuzzyVerdict::Unique;
        }
        let t = jaro(&new.normalized_title, &existing.normalized_title);
        return if t > VIDEO_TITLE_DUP {
            FuzzyVerdict::Duplicate {
                reason: match mode {
                    DedupMode::Entity => RejectionReason::EntityFuzzyMatch,
                    DedupMode::Company => RejectionReason::NearDuplicate,
                },
                similarity: t,
            }
        } else if t > VIDEO_TITLE_AMB {
            FuzzyVerdict::Ambiguous { similarity: t }
        } else {
            FuzzyVerdict::Unique
        };
    }

    let name_sim = name_similarity(new, existing, mode);

    // 2. Same registrable domain with interchangeable subdomains. Company
    //    identity lives at the domain level; entities fall through to the
    //    name comparison below.
    if !new.etld1.is_empty()
        && new.etld1 == existing.etld1
        && subdomains_similar(new.sub_kind, existing.sub_kind)
        && mode == DedupMode::Company
    {
        return FuzzyVerdict::Duplicate {
            reason: RejectionReason::SubdomainDuplicate,
            similarity: 1.0,
        };
    }

    // 3. Same brand token across different registrable domains.
    if new.brand.len() > MIN_TOKEN_LEN
        && new.brand == existing.brand
        && new.etld1 != existing.etld1
    {
        match (new.sub_kind, existing.sub_kind) {
            (SubdomainKind::Generic, SubdomainKind::Generic) => {
                if mode == DedupMode::Company {
                    return FuzzyVerdict::Duplicate {
                        reason: RejectionReason::UrlNearDuplicate,
                        similarity: name_sim,
                    };
                }
                return FuzzyVerdict::Ambiguous {
                    similarity: name_sim,
                };
            }
            (SubdomainKind::Generic, _) | (_, SubdomainKind::Generic) => {
                return FuzzyVerdict::Ambiguous {
                    similarity: name_sim,
                };
            }
            _ => {
                if name_sim > BRAND_NAME_DUP {
                    return FuzzyVerdict::Duplicate {
                        reason: match mode {
                            DedupMode::Entity => RejectionReason::EntityFuzzyMatch,
                            DedupMode::Company => RejectionReason::UrlNearDuplicate,
                        },
                        similarity: name_sim,
                    };
                }
                return FuzzyVerdict::Ambiguous {
                    similarity: name_sim,
                };
            }
        }
    }

    // 4. Name similarity.
    match mode {
        DedupMode::Company => {
            if new.name.len() > MIN_TOKEN_LEN
                && existing.name.len() > MIN_TOKEN_LEN
                && name_sim > COMPANY_NAME_DUP
            {
                return FuzzyVerdict::Duplicate {
                    reason: RejectionReason::NearDuplicate,
                    similarity: name_sim,
                };
            }
        }
        DedupMode::Entity => {
            if !new.normalized_title.is_empty()
                && !existing.normalized_title.is_empty()
                && name_sim > ENTITY_TITLE_DUP
            {
                return FuzzyVerdict::Duplicate {
                    reason: RejectionReason::EntityFuzzyMatch,
                    similarity: name_sim,
                };
            }
        }
    }

    // 5. Nothing ties them together.
    if new.brand != existing.brand && new.etld1 != existing.etld1 {
        return FuzzyVerdict::Unique;
    }

    // 6. Shared domain or brand without a deterministic answer.
    FuzzyVerdict::Ambiguous {
        similarity: name_sim,
    }
}

/// The comparison text per mode: lowercased display names for companies,
/// normalized titles for entities.
fn name_similarity(a: &CanonicalRow, b: &CanonicalRow, mode: DedupMode) -> f64 {
    match mode {
        DedupMode::Company => {
            if a.name.is_empty() || b.name.is_empty() {
                return 0.0;
            }
            jaro_winkler(&a.name.to_lowercase(), &b.name.to_lowercase())
        }
        DedupMode::Entity => {
            if a.normalized_title.is_empty() || b.normalized_title.is_empty() {
                return 0.0;
            }
            jaro_winkler(&a.normalized_title, &b.normalized_title)
        }
    }
}

/// Generic and organizational subdomains of the same domain are the same
/// site; two unrelated specific subdomains are not comparable here.
fn subdomains_similar(a: SubdomainKind, b: SubdomainKind) -> bool {
    use SubdomainKind::*;
    matches!(
        (a, b),
        (Generic, Generic) | (Generic, Organizational) | (Organizational, Generic) | (Organizational, Organizational)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize;
    use serde_json::json;

    fn company(id: &str, name: &str, url: &str) -> CanonicalRow {
        canonicalize(&json!({"id": id, "name": name, "url": url}), DedupMode::Company)
    }

    fn entity(id: &str, title: &str, url: &str) -> CanonicalRow {
        canonicalize(&json!({"id": id, "title": title, "url": url}), DedupMode::Entity)
    }

    #[test]
    fn www_variant_is_subdomain_duplicate() {
        let a = company("a", "Apple", "https://apple.com");
        let b = company("b", "Apple Inc", "https://www.apple.com");
        assert!(matches!(
            compare(&b, &a, DedupMode::Company),
            FuzzyVerdict::Duplicate {
                reason: RejectionReason::SubdomainDuplicate,
                ..
            }
        ));
    }

    #[test]
    fn careers_subdomain_is_duplicate_of_main_site() {
        let a = company("a", "Stripe", "https://stripe.com");
        let b = company("b", "Stripe Careers", "https://careers.stripe.com");
        assert!(matches!(
            compare(&b, &a, DedupMode::Company),
            FuzzyVerdict::Duplicate {
                reason: RejectionReason::SubdomainDuplicate,
                ..
            }
        ));
    }

    #[test]
    fn short_brand_regional_site_is_ambiguous() {
        // Brand "jd" is too short for the brand rule and the name guard
        // keeps two-letter names out of rule 4, so the LLM decides.
        let a = company("a", "JD", "https://jd.com");
        let b = company("b", "JD", "https://jd.hk");
        assert!(matches!(
            compare(&b, &a, DedupMode::Company),
            FuzzyVerdict::Ambiguous { .. }
        ));
    }

    #[test]
    fn specific_subdomain_same_domain_is_ambiguous() {
        let a = company("a", "JD", "https://jd.com");
        let c = company("c", "JD Global", "https://global.jd.com");
        assert!(matches!(
            compare(&c, &a, DedupMode::Company),
            FuzzyVerdict::Ambiguous { .. }
        ));
    }

    #[test]
    fn same_brand_generic_subdomains_different_tld_is_duplicate() {
        let a = company("a", "Shopify", "https://shopify.com");
        let b = company("b", "Shopify", "https://www.shopify.co.uk");
        assert!(matches!(
            compare(&b, &a, DedupMode::Company),
            FuzzyVerdict::Duplicate {
                reason: RejectionReason::UrlNearDuplicate,
                ..
            }
        ));
    }

    #[test]
    fn unrelated_companies_are_unique() {
        let a = company("a", "Apple", "https://apple.com");
        let b = company("b", "Stripe", "https://stripe.com");
        assert_eq!(compare(&b, &a, DedupMode::Company), FuzzyVerdict::Unique);
    }

    #[test]
    fn near_identical_names_are_duplicates() {
        let a = company("a", "Acme Robotics", "https://acmerobotics.com");
        let b = company("b", "Acme Robotics Inc", "https://acmein.co");
        // Different brand tokens, but the names agree almost exactly.
        match compare(&b, &a, DedupMode::Company) {
            FuzzyVerdict::Duplicate {
                reason: RejectionReason::NearDuplicate,
                similarity,
            } => assert!(similarity > 0.95),
            other => panic!("expected near_duplicate, got {other:?}"),
        }
    }

    #[test]
    fn entity_same_domain_falls_through_to_title() {
        let a = entity("1", "District 9 (2009)", "https://www.example.com/a");
        let b = entity("2", "District 9", "https://example.com/b");
        assert!(matches!(
            compare(&b, &a, DedupMode::Entity),
            FuzzyVerdict::Duplicate {
                reason: RejectionReason::EntityFuzzyMatch,
                ..
            }
        ));
    }

    #[test]
    fn entity_different_sites_different_titles_unique() {
        let a = entity("1", "District 9", "https://imdb.com/district-9");
        let b = entity("2", "Moon", "https://wikipedia.org/moon");
        assert_eq!(compare(&b, &a, DedupMode::Entity), FuzzyVerdict::Unique);
    }

    #[test]
    fn video_numbering_variant_is_ambiguous() {
        let a = entity("v1", "Inception Official Trailer", "https://youtube.com/x");
        let b = entity("v2", "Inception Official Trailer #2", "https://youtube.com/y");
        match compare(&b, &a, DedupMode::Entity) {
            FuzzyVerdict::Ambiguous { similarity } => {
                assert!(similarity > 0.85 && similarity <= 0.95, "sim {similarity}")
            }
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn video_identical_titles_are_duplicates() {
        let a = entity("v1", "Dune Part Two Teaser", "https://youtube.com/x");
        let b = entity("v2", "Dune Part Two Teaser", "https://youtube.com/y");
        assert!(matches!(
            compare(&b, &a, DedupMode::Entity),
            FuzzyVerdict::Duplicate { .. }
        ));
    }

    #[test]
    fn video_unrelated_titles_unique() {
        let a = entity("v1", "Inception Official Trailer", "https://youtube.com/x");
        let b = entity("v2", "Oppenheimer Clip", "https://youtube.com/y");
        assert_eq!(compare(&b, &a, DedupMode::Entity), FuzzyVerdict::Unique);
    }

    #[test]
    fn nameless_items_fall_back_to_domain_names() {
        let a = company("a", "", "https://apple.com");
        let b = company("b", "", "https://stripe.com");
        assert_eq!(a.name, "apple");
        assert_eq!(compare(&b, &a, DedupMode::Company), FuzzyVerdict::Unique);
    }
}
