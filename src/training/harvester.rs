//! Triplet selection over a single validation batch.

/// Indices of an (anchor, positive, negative) triple within one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triplet {
    pub anchor: usize,
    pub positive: usize,
    pub negative: usize,
}

pub trait TripletSelector {
    /// Selects triplets from the batch labels. Selection never looks at the
    /// embeddings themselves.
    fn triplets(&self, labels: &[usize]) -> Vec<Triplet>;
}

/// Emits every valid triplet: for each anchor, every other sample sharing its
/// label crossed with every sample of a different label.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllTripletSelector;

impl AllTripletSelector {
    pub fn new() -> Self {
        Self
    }

    /// Number of triplets `triplets` returns for these labels
    pub fn count(labels: &[usize]) -> usize {
        labels
            .iter()
            .map(|&label| {
                let same = labels.iter().filter(|&&other| other == label).count();
                (same - 1) * (labels.len() - same)
            })
            .sum()
    }
}

impl TripletSelector for AllTripletSelector {
    fn triplets(&self, labels: &[usize]) -> Vec<Triplet> {
        let mut triplets = Vec::with_capacity(Self::count(labels));

        for (anchor, &label) in labels.iter().enumerate() {
            let negatives: Vec<usize> = labels
                .iter()
                .enumerate()
                .filter(|&(_, &other)| other != label)
                .map(|(idx, _)| idx)
                .collect();
            if negatives.is_empty() {
                continue;
            }

            let positives = labels
                .iter()
                .enumerate()
                .filter(|&(idx, &other)| idx != anchor && other == label)
                .map(|(idx, _)| idx);

            for positive in positives {
                triplets.extend(negatives.iter().map(|&negative| Triplet {
                    anchor,
                    positive,
                    negative,
                }));
            }
        }

        triplets
    }
}
