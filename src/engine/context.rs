//! Context packing: select and order notes under a token budget.
//!
//! Packing is greedy over notes ordered by (importance desc, token_count
//! desc). A note that would overflow the budget is skipped, not the whole
//! packing; scanning continues until the note cap or end of list. Output
//! order matches selection order, so packing is deterministic given the
//! input.

use crate::types::Note;

/// Order notes for packing: importance descending, then token count
/// descending, then creation order for stability.
pub fn pack_order(notes: &mut [Note]) {
    notes.sort_by(|a, b| {
        b.importance
            .cmp(&a.importance)
            .then(b.token_count.cmp(&a.token_count))
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

/// Greedily pack notes under `budget` total tokens, at most `cap` notes.
pub fn pack_notes(mut notes: Vec<Note>, budget: u32, cap: usize) -> Vec<Note> {
    pack_order(&mut notes);

    let mut packed = Vec::new();
    let mut spent: u64 = 0;
    for note in notes {
        if packed.len() >= cap {
            break;
        }
        let candidate = spent.saturating_add(u64::from(note.token_count));
        if candidate > u64::from(budget) {
            continue;
        }
        spent = candidate;
        packed.push(note);
    }
    packed
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::types::NoteRole;

    fn note(importance: u8, token_count: u32) -> Note {
        Note {
            id: Uuid::new_v4(),
            job_id: Uuid::nil(),
            step_id: None,
            role: NoteRole::PageSummary,
            importance,
            token_count,
            content: format!("note i{importance} t{token_count}"),
            source_url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_pack_respects_budget() {
        let notes = vec![note(5, 500), note(5, 500), note(4, 500), note(4, 500)];
        let packed = pack_notes(notes, 1200, 10);
        assert_eq!(packed.len(), 2);
        let total: u32 = packed.iter().map(|n| n.token_count).sum();
        assert!(total <= 1200);
    }

    #[test]
    fn test_pack_respects_cap() {
        let notes = (0..10).map(|_| note(3, 10)).collect();
        let packed = pack_notes(notes, 10_000, 4);
        assert_eq!(packed.len(), 4);
    }

    #[test]
    fn test_pack_skips_overflow_and_continues() {
        // The big note would overflow; the small ones after it still fit.
        let notes = vec![note(5, 900), note(4, 2000), note(3, 50), note(2, 40)];
        let packed = pack_notes(notes, 1000, 10);
        let counts: Vec<u32> = packed.iter().map(|n| n.token_count).collect();
        assert_eq!(counts, vec![900, 50, 40]);
    }

    #[test]
    fn test_pack_prefers_importance_then_size() {
        let notes = vec![note(3, 999), note(5, 10), note(4, 500), note(5, 100)];
        let packed = pack_notes(notes, 10_000, 10);
        let order: Vec<(u8, u32)> = packed
            .iter()
            .map(|n| (n.importance, n.token_count))
            .collect();
        assert_eq!(order, vec![(5, 100), (5, 10), (4, 500), (3, 999)]);
    }

    /// Forty notes, importance cycling 5,4,3…, 500 tokens each, budget 3000,
    /// cap 8: exactly the six highest-importance notes fit the budget.
    #[test]
    fn test_budget_packing_scenario() {
        let mut notes = Vec::new();
        for i in 0u32..40 {
            let importance = match i.checked_rem(3) {
                Some(0) => 5,
                Some(1) => 4,
                _ => 3,
            };
            notes.push(note(importance, 500));
        }
        let packed = pack_notes(notes, 3000, 8);
        assert_eq!(packed.len(), 6);
        assert!(packed.iter().all(|n| n.importance == 5));
        let total: u32 = packed.iter().map(|n| n.token_count).sum();
        assert_eq!(total, 3000);
    }
}
