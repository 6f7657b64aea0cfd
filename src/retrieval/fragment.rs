use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Up to three embeddings describing one fragment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FragmentEmbeddings {
    /// Embedding of category and content together; required for search
    pub combined: Option<Vec<f32>>,
    pub category: Option<Vec<f32>>,
    pub content: Option<Vec<f32>>,
}

impl FragmentEmbeddings {
    pub fn combined_only(combined: Vec<f32>) -> Self {
        Self {
            combined: Some(combined),
            ..Self::default()
        }
    }

    /// Dimension shared by the present embeddings
    ///
    /// `None` when nothing is present; `Err` carries the two disagreeing
    /// lengths.
    pub fn dimension(&self) -> std::result::Result<Option<usize>, (usize, usize)> {
        let mut dimension = None;
        for vector in [&self.combined, &self.category, &self.content]
            .into_iter()
            .flatten()
        {
            match dimension {
                None => dimension = Some(vector.len()),
                Some(d) if d != vector.len() => return Err((d, vector.len())),
                Some(_) => {}
            }
        }
        Ok(dimension)
    }

    /// Embed a new fragment's category, content and both together
    pub fn compute(provider: &dyn EmbeddingProvider, category: &str, content: &str) -> Result<Self> {
        let texts = vec![
            format!("{}: {}", category, content),
            category.to_string(),
            content.to_string(),
        ];
        let mut vectors = provider.embed_batch(&texts)?.into_iter();
        Ok(Self {
            combined: vectors.next(),
            category: vectors.next(),
            content: vectors.next(),
        })
    }
}

/// A stored piece of knowledge: a category label plus content text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFragment {
    pub id: i64,
    pub category: String,
    pub content: String,
    #[serde(skip)]
    pub embeddings: FragmentEmbeddings,
    pub created_at: DateTime<Utc>,
}

impl MemoryFragment {
    /// Only fragments with a combined embedding take part in ranking
    pub fn is_searchable(&self) -> bool {
        self.embeddings.combined.is_some()
    }

    /// Text used for keyword matching
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.category, self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_agreement() {
        let mut embeddings = FragmentEmbeddings::combined_only(vec![0.0; 4]);
        assert_eq!(embeddings.dimension(), Ok(Some(4)));

        embeddings.category = Some(vec![0.0; 4]);
        assert_eq!(embeddings.dimension(), Ok(Some(4)));

        embeddings.content = Some(vec![0.0; 3]);
        assert_eq!(embeddings.dimension(), Err((4, 3)));

        assert_eq!(FragmentEmbeddings::default().dimension(), Ok(None));
    }

    struct LengthProvider;

    impl EmbeddingProvider for LengthProvider {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, crate::embedding::EmbeddingError> {
            Ok(vec![text.len() as f32, 1.0])
        }

        fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, crate::embedding::EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "length"
        }
    }

    #[test]
    fn test_compute_embeds_all_three_texts() {
        let embeddings = FragmentEmbeddings::compute(&LengthProvider, "Pool", "Bounded").unwrap();
        assert_eq!(embeddings.combined, Some(vec![13.0, 1.0]));
        assert_eq!(embeddings.category, Some(vec![4.0, 1.0]));
        assert_eq!(embeddings.content, Some(vec![7.0, 1.0]));
    }
}
