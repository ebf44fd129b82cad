/// Scored tables, best first, capped at `k`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopK {
    k: usize,
    scores: Vec<(String, f64)>,
}

impl TopK {
    pub fn new(k: usize, scores: Vec<(String, f64)>) -> Self {
        Self { k, scores }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of entries [`results`](Self::results) yields.
    pub fn size(&self) -> usize {
        self.k.min(self.scores.len())
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn push(&mut self, table: impl Into<String>, score: f64) {
        self.scores.push((table.into(), score));
    }

    /// The top `k` entries by descending score. Equal scores keep insertion
    /// order.
    pub fn results(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        let mut ranked: Vec<(&str, f64)> =
            self.scores.iter().map(|(t, s)| (t.as_str(), *s)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(self.k);
        ranked.into_iter()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.results().map(|(t, _)| t.to_string()).collect()
    }
}
