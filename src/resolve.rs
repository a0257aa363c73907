use crate::report::ConsolidatedParticipant;

/// One enrolled student as supplied by the roster collaborator. The order
/// rosters arrive in is stable and load-bearing: first-in-order wins exact
/// ties.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub student_id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
}

/// Which rule level produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    /// Canonical name equals the roster name, case-insensitively.
    Exact,
    /// Equal after removing spaces from both sides.
    Normalized,
    /// Token-subset rule matched exactly one roster entry.
    TokenFuzzy,
}

impl MatchTier {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchTier::Exact => "exact",
            MatchTier::Normalized => "normalized",
            MatchTier::TokenFuzzy => "tokenFuzzy",
        }
    }
}

#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Matched { student_id: String, tier: MatchTier },
    /// Two or more roster entries satisfied the token rule equally well.
    /// Surfaced for manual review instead of picking by roster order.
    Ambiguous { candidates: Vec<String> },
    Unmatched,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub canonical_name: String,
    pub outcome: MatchOutcome,
}

fn normalized(name: &str) -> String {
    name.to_lowercase().replace(' ', "")
}

/// Token-subset rule: one token set contains the other, and the overlap is
/// either two or more tokens, or the participant printed a single token that
/// is the whole overlap ("Aditi Nayak" vs roster "Aditi H Nayak").
fn token_subset_match(participant: &str, roster_name: &str) -> bool {
    let p_tokens: std::collections::HashSet<&str> = participant.split_whitespace().collect();
    let roster_lower = roster_name.to_lowercase();
    let r_tokens: std::collections::HashSet<&str> = roster_lower.split_whitespace().collect();
    if p_tokens.is_empty() || r_tokens.is_empty() {
        return false;
    }
    let subset = p_tokens.is_subset(&r_tokens) || r_tokens.is_subset(&p_tokens);
    if !subset {
        return false;
    }
    let common = p_tokens.intersection(&r_tokens).count();
    common >= 2 || (p_tokens.len() == 1 && common == 1)
}

fn resolve_one(participant: &ConsolidatedParticipant, roster: &[RosterEntry]) -> MatchOutcome {
    let name = participant.canonical_name.as_str();
    let name_no_spaces = normalized(name);

    // Tier 1: exact, first roster entry in stable order wins.
    for entry in roster {
        let roster_lower = entry.username.to_lowercase();
        if roster_lower == name {
            return MatchOutcome::Matched {
                student_id: entry.student_id.clone(),
                tier: MatchTier::Exact,
            };
        }
        if normalized(&entry.username) == name_no_spaces {
            return MatchOutcome::Matched {
                student_id: entry.student_id.clone(),
                tier: MatchTier::Normalized,
            };
        }
    }

    // Tier 2: token subset. All qualifiers are collected so a tie can be
    // surfaced rather than silently resolved by roster order.
    let candidates: Vec<&RosterEntry> = roster
        .iter()
        .filter(|e| token_subset_match(name, &e.username))
        .collect();

    match candidates.len() {
        0 => MatchOutcome::Unmatched,
        1 => MatchOutcome::Matched {
            student_id: candidates[0].student_id.clone(),
            tier: MatchTier::TokenFuzzy,
        },
        _ => MatchOutcome::Ambiguous {
            candidates: candidates.iter().map(|e| e.username.clone()).collect(),
        },
    }
}

/// Resolve every consolidated participant against the roster. Output order
/// follows participant order; the roster is only read.
pub fn resolve_participants(
    participants: &[ConsolidatedParticipant],
    roster: &[RosterEntry],
) -> Vec<MatchResult> {
    participants
        .iter()
        .map(|p| MatchResult {
            canonical_name: p.canonical_name.clone(),
            outcome: resolve_one(p, roster),
        })
        .collect()
}
