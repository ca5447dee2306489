use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;
use trendscout_core::{Keyword, KeywordResult};

/// Filters a checkpoint log down to the ranked output.
///
/// Duplicate records for one keyword collapse to the last one written, kept at
/// the position of the first. Only records that pass the threshold and have a
/// score survive. Order is score descending, then current interest descending,
/// then the keyword's position in `input_order`, then log position. The result
/// is the same for the same log regardless of how many runs produced it.
pub fn rank_results(log: Vec<KeywordResult>, input_order: &[Keyword]) -> Vec<KeywordResult> {
    let input_index: HashMap<String, usize> = input_order
        .iter()
        .enumerate()
        .map(|(index, keyword)| (keyword.key(), index))
        .collect();

    let mut slots: Vec<KeywordResult> = Vec::with_capacity(log.len());
    let mut slot_by_key: HashMap<String, usize> = HashMap::new();
    for record in log {
        let key = record.key();
        match slot_by_key.get(&key) {
            Some(&slot) => slots[slot] = record,
            None => {
                slot_by_key.insert(key, slots.len());
                slots.push(record);
            }
        }
    }

    let mut ranked: Vec<(usize, usize, KeywordResult)> = slots
        .into_iter()
        .enumerate()
        .filter(|(_, record)| record.is_ranked())
        .map(|(log_index, record)| {
            let input = input_index.get(&record.key()).copied().unwrap_or(usize::MAX);
            (input, log_index, record)
        })
        .collect();

    ranked.sort_by(|(a_input, a_log, a), (b_input, b_log, b)| {
        descending(a.score, b.score)
            .then_with(|| descending(a.current_interest, b.current_interest))
            .then_with(|| a_input.cmp(b_input))
            .then_with(|| a_log.cmp(b_log))
    });

    debug!("Ranked {} of {} logged keywords", ranked.len(), slot_by_key.len());
    ranked.into_iter().map(|(_, _, record)| record).collect()
}

// Present values sort before missing ones.
fn descending(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
