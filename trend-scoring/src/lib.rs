pub mod growth;
pub mod rank;
pub mod score;

pub use growth::{growth_pct, GrowthCalculator};
pub use rank::rank_results;
pub use score::{passes_threshold, score, TrendScorer};
