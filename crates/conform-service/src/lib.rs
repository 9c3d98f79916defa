pub mod config;
pub mod scenario;
pub mod service;
pub mod util;

pub use config::*;
pub use service::*;
pub use util::*;

#[cfg(test)]
mod fixture_tests {
    use conform_core::{Dimension, Evaluation};
    use std::path::Path;

    #[test]
    fn loads_and_aggregates_portal_salud() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/evaluations/portal-salud.json");
        let raw = std::fs::read_to_string(path).unwrap();
        let evaluation = Evaluation::from_json(&raw).unwrap();
        let dims = evaluation.dimensions();
        for d in Dimension::KNOWN {
            assert!(dims.contains_key(d.key()), "missing {}", d.key());
        }
        let total: usize = dims.values().map(|v| v.total_count).sum();
        assert_eq!(total, evaluation.criteria_results.len());
        // SEM-03-NLP is declared under semantica but counted under nlp
        assert!(dims["nlp"].criteria.iter().any(|c| c.criteria_id.as_str() == "SEM-03-NLP"));
        assert_eq!(dims["nlp"].percentage, 58.0);
        assert_eq!(dims["semantica"].percentage, 71.5);
    }
}
