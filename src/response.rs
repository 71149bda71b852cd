//! Answer returned for one query, with provenance.
//!
//! Serialises with camelCase wire names:
//!
//! ```json
//! {
//!   "advice": "...",
//!   "retrievedDocuments": ["Be kind.", "Practice patience."],
//!   "metadata": {
//!     "retrievalScores": [0.41, 0.77],
//!     "embeddingsModel": "sentence-transformers/all-MiniLM-L6-v2",
//!     "promptUsed": "Context:\n..."
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};

/// The final answer plus everything used to produce it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviceResponse {
    pub advice: String,
    /// Every chunk produced from the retrieved documents, before truncation.
    #[serde(rename = "retrievedDocuments")]
    pub retrieved_chunks: Vec<String>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// One score per retrieved document, in rank order.
    #[serde(rename = "retrievalScores")]
    pub retrieval_scores: Vec<f32>,
    #[serde(rename = "embeddingsModel")]
    pub embedding_model_id: String,
    /// The exact prompt sent to the model.
    #[serde(rename = "promptUsed")]
    pub prompt_used: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_names() {
        let response = AdviceResponse {
            advice: "Be patient.".to_string(),
            retrieved_chunks: vec!["Practice patience.".to_string()],
            metadata: ResponseMetadata {
                retrieval_scores: vec![0.5],
                embedding_model_id: "mini".to_string(),
                prompt_used: "p".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "advice": "Be patient.",
                "retrievedDocuments": ["Practice patience."],
                "metadata": {
                    "retrievalScores": [0.5],
                    "embeddingsModel": "mini",
                    "promptUsed": "p"
                }
            })
        );
    }
}
